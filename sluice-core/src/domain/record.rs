//! Record and batch types

use serde::{Deserialize, Serialize};

/// Number of records in every batch except the last one of a run
pub const BATCH_SIZE: usize = 1000;

/// A loosely typed record: field name to JSON value, in source field order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A bounded, ordered group of records moved through the pipeline as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    /// Zero-based position of this batch within its run
    pub index: usize,
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(index: usize, records: Vec<Record>) -> Self {
        Self { index, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Applies `f` to every record, producing a new batch at the same index
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnMut(Record) -> Record,
    {
        Self {
            index: self.index,
            records: self.records.into_iter().map(f).collect(),
        }
    }
}
