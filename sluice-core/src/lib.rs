//! Sluice Core
//!
//! Core types and abstractions for the Sluice ETL engine.
//!
//! This crate contains:
//! - Domain types: records, batches, run records, notification specs
//! - Descriptors: source/sink capabilities and the token resolver

pub mod descriptor;
pub mod domain;

pub use descriptor::{
    Capability, DbProtocol, DescriptorKind, FileFormat, ResolveError, SinkDescriptor, SinkTarget,
    SourceDescriptor, resolve,
};
pub use domain::notification::{EmailSpec, Notifications, TextSpec};
pub use domain::pipeline::PipelineState;
pub use domain::record::{BATCH_SIZE, Record, RecordBatch};
pub use domain::run::{RunRecord, RunStatus, RunTrigger};
