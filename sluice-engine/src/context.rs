//! Per-run execution context
//!
//! Created fresh at the entry of every run, whether the run was started
//! manually, by a schedule firing or by a predecessor. Holds the write
//! counter that decides create-vs-append for file sinks, so it always starts
//! at zero and is never shared between runs.

use sluice_core::{RunRecord, RunTrigger};
use uuid::Uuid;

/// Mutable state owned by a single run
#[derive(Debug)]
pub struct RunContext {
    record: RunRecord,
    write_counter: u64,
}

impl RunContext {
    /// Starts a run
    ///
    /// # Arguments
    /// * `pipeline_id` - The pipeline being executed
    /// * `pipeline_name` - Its display name
    /// * `trigger` - What started the run
    pub fn new(pipeline_id: Uuid, pipeline_name: &str, trigger: RunTrigger) -> Self {
        Self {
            record: RunRecord::start(pipeline_id, pipeline_name, trigger),
            write_counter: 0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.record.run_id
    }

    /// Counter to pass with the next file write
    pub fn write_counter(&self) -> u64 {
        self.write_counter
    }

    /// Records a successfully written batch
    ///
    /// The write counter only moves for file sinks.
    pub fn batch_written(&mut self, records: usize, file_sink: bool) {
        if file_sink {
            self.write_counter += 1;
        }
        self.record.batches_written += 1;
        self.record.records_written += records as u64;
    }

    /// Finalizes the run record as succeeded
    pub fn succeed(self) -> RunRecord {
        self.record.succeed()
    }

    /// Finalizes the run record as failed
    pub fn fail(self, error: impl Into<String>) -> RunRecord {
        self.record.fail(error)
    }
}
