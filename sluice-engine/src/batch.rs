//! Record batching
//!
//! Groups an ordered record sequence into contiguous batches of
//! [`BATCH_SIZE`] records. The last batch of a run holds the remainder.

use sluice_core::{BATCH_SIZE, Record, RecordBatch};

/// Incremental batcher fed one record at a time
///
/// `push` hands back a full batch every `capacity` records and `finish`
/// flushes the partial remainder, so a source never needs to be buffered
/// in full.
#[derive(Debug)]
pub struct Batcher {
    capacity: usize,
    next_index: usize,
    buffer: Vec<Record>,
}

impl Batcher {
    /// Creates a batcher producing batches of [`BATCH_SIZE`]
    pub fn new() -> Self {
        Self::with_capacity(BATCH_SIZE)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_index: 0,
            buffer: Vec::with_capacity(capacity.max(1)),
        }
    }

    /// Adds a record, returning a batch once `capacity` records are buffered
    pub fn push(&mut self, record: Record) -> Option<RecordBatch> {
        self.buffer.push(record);
        if self.buffer.len() == self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Flushes the remaining records, if any
    pub fn finish(mut self) -> Option<RecordBatch> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> RecordBatch {
        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity));
        let batch = RecordBatch::new(self.next_index, records);
        self.next_index += 1;
        batch
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new()
    }
}
