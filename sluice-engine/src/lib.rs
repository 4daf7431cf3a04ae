//! Sluice Engine
//!
//! Composes a source, an ordered chain of record transforms and a sink into
//! a pipeline, and runs it once, on cron schedules, or as the successor of
//! another pipeline.
//!
//! Architecture:
//! - Pipeline: lifecycle state machine and composition
//! - Execution: the composed plan and its per-run context
//! - Drivers: readers and writers for flat files and databases
//! - Scheduler: cron adapter with cancellable handles
//! - Services: completion notifications and successor dispatch
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sluice_engine::driver::{CsvReader, JsonWriter};
//! use sluice_engine::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> sluice_engine::Result<()> {
//!     let pipeline = Pipeline::new("users");
//!     pipeline.set_source(Arc::new(CsvReader), "users.csv", None)?;
//!     pipeline.add_transform_specs(["rename:first_name=given_name"])?;
//!     pipeline.set_sink(Arc::new(JsonWriter), "clean.json", "out")?;
//!     pipeline.compose()?;
//!
//!     let outcome = pipeline.run(true).await?;
//!     println!("{:?}", outcome.record);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod scheduler;
pub mod service;
pub mod transform;

pub use config::{EngineConfig, parse_start_flag};
pub use error::{DriverError, EtlError, ExecutionError, NotifyError, Result, Stage};
pub use pipeline::{Pipeline, RunOutcome, Successor};
pub use service::CompletionHandle;
pub use transform::{Transform, TransformChain, TransformSpec};
