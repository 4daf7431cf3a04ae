//! Driver layer
//!
//! Drivers are the readers and writers that move records in and out of
//! concrete systems (flat files, databases). The engine only sees the traits
//! defined here; every driver declares the capability it handles so the
//! pipeline can validate a configuration by direct comparison.
//!
//! All drivers are trait-based to enable testing and mocking.

mod csv;
mod json;
mod postgres;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use sluice_core::{BATCH_SIZE, Capability, DbProtocol, FileFormat, Record, RecordBatch, SinkTarget};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::DriverError;

// Re-export implementations
pub use self::csv::{CsvReader, CsvWriter};
pub use self::json::{JsonReader, JsonWriter};
pub use self::postgres::{PostgresReader, PostgresWriter};

/// Lazy, finite sequence of records produced by a reader
///
/// The end of the stream signals completion; an `Err` item signals failure.
pub type RecordStream = BoxStream<'static, Result<Record, DriverError>>;

/// Producer side of a [`record_channel`]
pub(crate) type RecordSender = mpsc::Sender<Result<Record, DriverError>>;

/// Bounded channel from a producer task to a [`RecordStream`]
///
/// Holds at most one batch worth of records, so a reader never runs more
/// than a batch ahead of the writer. The producer should stop once `send`
/// fails, which means the run dropped the stream.
pub(crate) fn record_channel() -> (RecordSender, RecordStream) {
    let (tx, rx) = mpsc::channel(BATCH_SIZE);
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, Box::pin(stream))
}

/// Reads records from a source
#[async_trait]
pub trait Reader: Send + Sync {
    /// The format or protocol this reader handles
    fn capability(&self) -> Capability;

    /// Opens the source and returns its records
    ///
    /// # Arguments
    /// * `location` - File path or connection string
    /// * `sub_resource` - Table or collection for database sources
    async fn read(
        &self,
        location: &str,
        sub_resource: Option<&str>,
    ) -> Result<RecordStream, DriverError>;
}

/// Where a single batch goes
#[derive(Debug, Clone, Copy)]
pub enum WriteTarget<'a> {
    /// `write_counter == 0` means create/truncate, anything above means append
    File {
        path: &'a Path,
        file_name: &'a str,
        write_counter: u64,
    },
    Database {
        connection: &'a str,
        collection: &'a str,
    },
}

/// Writes records to a sink
#[async_trait]
pub trait Writer: Send + Sync {
    /// The format or protocol this writer handles
    fn capability(&self) -> Capability;

    /// Acquires the resources needed for one run
    ///
    /// The returned session is closed by the engine when the run ends,
    /// whether it succeeded or not.
    async fn open(&self, target: &SinkTarget) -> Result<Box<dyn BatchWriter>, DriverError>;
}

/// A run-scoped writer session
#[async_trait]
pub trait BatchWriter: Send {
    async fn write(&mut self, batch: &RecordBatch, target: WriteTarget<'_>) -> Result<(), DriverError>;

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Registry of readers and writers keyed by capability
///
/// Used by one-call composition and the CLI to pick drivers from a location
/// token instead of naming them explicitly.
pub struct DriverRegistry {
    readers: HashMap<Capability, Arc<dyn Reader>>,
    writers: HashMap<Capability, Arc<dyn Writer>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            writers: HashMap::new(),
        }
    }

    /// Creates a registry with every bundled driver
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_reader(CsvReader);
        registry.register_reader(JsonReader);
        registry.register_reader(PostgresReader::default());
        registry.register_writer(CsvWriter);
        registry.register_writer(JsonWriter);
        registry.register_writer(PostgresWriter::default());
        registry
    }

    /// Registers a reader
    ///
    /// # Panics
    /// Panics if a reader for the same capability is already registered
    pub fn register_reader<R: Reader + 'static>(&mut self, reader: R) {
        let capability = reader.capability();
        if self.readers.contains_key(&capability) {
            panic!("Reader for '{}' is already registered", capability);
        }
        self.readers.insert(capability, Arc::new(reader));
    }

    /// Registers a writer
    ///
    /// # Panics
    /// Panics if a writer for the same capability is already registered
    pub fn register_writer<W: Writer + 'static>(&mut self, writer: W) {
        let capability = writer.capability();
        if self.writers.contains_key(&capability) {
            panic!("Writer for '{}' is already registered", capability);
        }
        self.writers.insert(capability, Arc::new(writer));
    }

    pub fn reader(&self, capability: Capability) -> Option<Arc<dyn Reader>> {
        self.readers.get(&capability).cloned()
    }

    pub fn writer(&self, capability: Capability) -> Option<Arc<dyn Writer>> {
        self.writers.get(&capability).cloned()
    }

    /// Capabilities with a registered reader, in a stable order
    pub fn reader_capabilities(&self) -> Vec<Capability> {
        sorted(self.readers.keys().copied())
    }

    /// Capabilities with a registered writer, in a stable order
    pub fn writer_capabilities(&self) -> Vec<Capability> {
        sorted(self.writers.keys().copied())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(caps: impl Iterator<Item = Capability>) -> Vec<Capability> {
    let mut caps: Vec<Capability> = caps.collect();
    caps.sort_by_key(|c| c.to_string());
    caps
}

/// Unpacks a file target, rejecting database targets
pub(crate) fn expect_file<'a>(
    target: &WriteTarget<'a>,
    format: FileFormat,
) -> Result<(&'a Path, &'a str, u64), DriverError> {
    match *target {
        WriteTarget::File {
            path,
            file_name,
            write_counter,
        } => Ok((path, file_name, write_counter)),
        WriteTarget::Database { .. } => Err(DriverError::Unsupported(format!(
            "{} writer cannot write to a database target",
            format.extension()
        ))),
    }
}

/// Unpacks a database target, rejecting file targets
pub(crate) fn expect_database<'a>(
    target: &WriteTarget<'a>,
    protocol: DbProtocol,
) -> Result<(&'a str, &'a str), DriverError> {
    match *target {
        WriteTarget::Database {
            connection,
            collection,
        } => Ok((connection, collection)),
        WriteTarget::File { .. } => Err(DriverError::Unsupported(format!(
            "{} writer cannot write to a file target",
            protocol.scheme()
        ))),
    }
}
