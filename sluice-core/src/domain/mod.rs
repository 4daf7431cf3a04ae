//! Core domain types
//!
//! This module contains the core domain structures used across Sluice crates.
//! These types describe what flows through a pipeline (records and batches)
//! and what a pipeline reports about itself (lifecycle state and run records).

pub mod notification;
pub mod pipeline;
pub mod record;
pub mod run;
