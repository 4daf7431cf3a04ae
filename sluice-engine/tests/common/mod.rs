//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use sluice_core::{
    Capability, EmailSpec, FileFormat, Record, RecordBatch, SinkTarget, TextSpec,
};
use sluice_engine::driver::{BatchWriter, Reader, RecordStream, WriteTarget, Writer};
use sluice_engine::error::{DriverError, NotifyError};
use sluice_engine::scheduler::{FiringCallback, ScheduleHandle, Scheduler};
use sluice_engine::service::{EmailTransport, TextTransport};
use sluice_engine::{CompletionHandle, RunOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn user(seq: usize) -> Record {
    let serde_json::Value::Object(map) = json!({
        "seq": seq,
        "first_name": format!("user{}", seq),
    }) else {
        unreachable!()
    };
    map
}

pub fn users(n: usize) -> Vec<Record> {
    (0..n).map(user).collect()
}

/// Waits for the completion task of a run and returns the successor outcome
pub async fn successor_outcome(completion: Option<CompletionHandle>) -> Option<RunOutcome> {
    let handle = completion?;
    handle.await.unwrap().map(|outcome| outcome.unwrap())
}

// =============================================================================
// Reader
// =============================================================================

/// Reader serving records from memory, optionally failing after `fail_after`
#[derive(Clone)]
pub struct VecReader {
    capability: Capability,
    records: Vec<Record>,
    fail_after: Option<usize>,
}

impl VecReader {
    pub fn csv(records: Vec<Record>) -> Self {
        Self {
            capability: Capability::File(FileFormat::Csv),
            records,
            fail_after: None,
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

#[async_trait]
impl Reader for VecReader {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn read(
        &self,
        _location: &str,
        _sub_resource: Option<&str>,
    ) -> Result<RecordStream, DriverError> {
        let mut items: Vec<Result<Record, DriverError>> =
            self.records.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(DriverError::InvalidData("source went away".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

// =============================================================================
// Writer
// =============================================================================

/// One observed `write` call
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub batch: usize,
    pub len: usize,
    pub write_counter: Option<u64>,
}

#[derive(Default)]
pub struct WriterLog {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub calls: Mutex<Vec<WriteCall>>,
    pub records: Mutex<Vec<Record>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl WriterLog {
    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn counters(&self) -> Vec<Option<u64>> {
        self.calls().into_iter().map(|c| c.write_counter).collect()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }
}

/// Writer that records every call instead of writing anywhere
#[derive(Clone)]
pub struct RecordingWriter {
    capability: Capability,
    pub log: Arc<WriterLog>,
    delay: Duration,
    fail_on_batch: Option<usize>,
}

impl RecordingWriter {
    pub fn csv() -> Self {
        Self {
            capability: Capability::File(FileFormat::Csv),
            log: Arc::new(WriterLog::default()),
            delay: Duration::ZERO,
            fail_on_batch: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }
}

#[async_trait]
impl Writer for RecordingWriter {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn open(&self, _target: &SinkTarget) -> Result<Box<dyn BatchWriter>, DriverError> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BatchWriter for RecordingWriter {
    async fn write(&mut self, batch: &RecordBatch, target: WriteTarget<'_>) -> Result<(), DriverError> {
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on_batch == Some(batch.index) {
            return Err(DriverError::InvalidData("sink rejected batch".to_string()));
        }

        let write_counter = match target {
            WriteTarget::File { write_counter, .. } => Some(write_counter),
            WriteTarget::Database { .. } => None,
        };
        self.log.calls.lock().unwrap().push(WriteCall {
            batch: batch.index,
            len: batch.len(),
            write_counter,
        });
        self.log
            .records
            .lock()
            .unwrap()
            .extend(batch.records.iter().cloned());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Scheduler that fires only when a test says so
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<(ScheduleHandle, FiringCallback)>>,
    pub cancelled: Mutex<Vec<ScheduleHandle>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active(&self) -> Vec<ScheduleHandle> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(h, _)| h.clone())
            .collect()
    }

    /// Callback of the `index`-th active schedule
    pub fn callback(&self, index: usize) -> FiringCallback {
        Arc::clone(&self.entries.lock().unwrap()[index].1)
    }

    /// Fires the `index`-th active schedule and waits for the firing
    pub async fn fire(&self, index: usize) {
        let callback = self.callback(index);
        callback().await;
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(
        &self,
        expression: &str,
        callback: FiringCallback,
    ) -> sluice_engine::Result<ScheduleHandle> {
        let handle = ScheduleHandle::new(expression);
        self.entries
            .lock()
            .unwrap()
            .push((handle.clone(), callback));
        Ok(handle)
    }

    fn cancel(&self, handle: &ScheduleHandle) {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(h, _)| h != handle);
        if entries.len() != before {
            self.cancelled.lock().unwrap().push(handle.clone());
        }
    }
}

// =============================================================================
// Transports
// =============================================================================

/// Transport recording deliveries in order, optionally failing every one
///
/// A gated transport waits for a semaphore permit before each delivery.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
    pub fail: bool,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(Self {
            gate: Some(gate.clone()),
            ..Self::default()
        });
        (transport, gate)
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn send_email(&self, email: &EmailSpec) -> Result<(), NotifyError> {
        self.pass_gate().await;
        self.sent.lock().unwrap().push(format!("email:{}", email.to));
        if self.fail {
            return Err(NotifyError::Rejected("mailbox full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TextTransport for RecordingTransport {
    async fn send_text(&self, text: &TextSpec) -> Result<(), NotifyError> {
        self.pass_gate().await;
        self.sent.lock().unwrap().push(format!("text:{}", text.to));
        if self.fail {
            return Err(NotifyError::Rejected("carrier unavailable".to_string()));
        }
        Ok(())
    }
}

pub fn email(to: &str) -> EmailSpec {
    EmailSpec {
        to: to.to_string(),
        from: "etl@example.com".to_string(),
        subject: "done".to_string(),
        text: "finished".to_string(),
        html: None,
    }
}

pub fn text(to: &str) -> TextSpec {
    TextSpec {
        to: to.to_string(),
        body: "finished".to_string(),
    }
}
