//! CSV reader and writer

use async_trait::async_trait;
use serde_json::Value;
use sluice_core::{Capability, FileFormat, Record, RecordBatch, SinkTarget};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::{
    BatchWriter, Reader, RecordSender, RecordStream, WriteTarget, Writer, expect_file,
    record_channel,
};
use crate::error::DriverError;
use crate::transform::display_value;

const FORMAT: FileFormat = FileFormat::Csv;

/// Reads a headed CSV file, one record per row
///
/// Every value is kept as a string; empty cells become empty strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReader;

#[async_trait]
impl Reader for CsvReader {
    fn capability(&self) -> Capability {
        Capability::File(FORMAT)
    }

    async fn read(
        &self,
        location: &str,
        _sub_resource: Option<&str>,
    ) -> Result<RecordStream, DriverError> {
        let file = File::open(location).await?.into_std().await;
        let (tx, stream) = record_channel();

        let location = location.to_string();
        tokio::task::spawn_blocking(move || {
            let rows = send_rows(file, &tx);
            debug!(location = %location, rows, "Read CSV source");
        });
        Ok(stream)
    }
}

/// Parses rows from `source` into `tx` until the input, the first error or
/// the receiver runs out, returning the number of records sent
fn send_rows<R: std::io::Read>(source: R, tx: &RecordSender) -> usize {
    let mut reader = csv::Reader::from_reader(source);
    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            let _ = tx.blocking_send(Err(e.into()));
            return 0;
        }
    };

    let mut sent = 0;
    for row in reader.records() {
        let item = row.map_err(DriverError::from).map(|row| {
            headers
                .iter()
                .zip(row.iter())
                .map(|(name, cell)| (name.to_string(), Value::String(cell.to_string())))
                .collect::<Record>()
        });
        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            break;
        }
        sent += 1;
    }
    sent
}

/// Writes batches as CSV rows
///
/// The first write of a run truncates the file and writes the header taken
/// from the first record. Later writes append rows aligned to that header;
/// fields missing from a record become empty cells and fields unknown to the
/// header are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWriter;

#[async_trait]
impl Writer for CsvWriter {
    fn capability(&self) -> Capability {
        Capability::File(FORMAT)
    }

    async fn open(&self, _target: &SinkTarget) -> Result<Box<dyn BatchWriter>, DriverError> {
        Ok(Box::new(CsvSession {
            header: None,
            warned_dropped: false,
        }))
    }
}

struct CsvSession {
    header: Option<Vec<String>>,
    /// Set once fields outside the header have been reported
    warned_dropped: bool,
}

#[async_trait]
impl BatchWriter for CsvSession {
    async fn write(&mut self, batch: &RecordBatch, target: WriteTarget<'_>) -> Result<(), DriverError> {
        let (path, file_name, write_counter) = expect_file(&target, FORMAT)?;
        let full_path = path.join(file_name);

        let (header, fresh) = if write_counter == 0 {
            (header_of(batch), true)
        } else {
            match self.header.take() {
                Some(header) => (header, false),
                None => match read_header(&full_path).await? {
                    Some(header) => (header, false),
                    None => (header_of(batch), true),
                },
            }
        };

        if !self.warned_dropped {
            let dropped = dropped_columns(batch, &header);
            if !dropped.is_empty() {
                warn!(
                    file = %full_path.display(),
                    batch = batch.index,
                    columns = ?dropped,
                    "Fields outside the CSV header are dropped"
                );
                self.warned_dropped = true;
            }
        }

        let body = encode(batch, &header, fresh)?;

        let mut file = if write_counter == 0 {
            File::create(&full_path).await?
        } else {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&full_path)
                .await?
        };
        file.write_all(&body).await?;
        file.flush().await?;

        self.header = Some(header);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Column order: first-seen order across the batch
fn header_of(batch: &RecordBatch) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for record in &batch.records {
        for key in record.keys() {
            if !header.iter().any(|h| h == key) {
                header.push(key.clone());
            }
        }
    }
    header
}

/// Fields of `batch` that have no column in `header`, in first-seen order
fn dropped_columns(batch: &RecordBatch, header: &[String]) -> Vec<String> {
    let mut dropped: Vec<String> = Vec::new();
    for key in batch.records.iter().flat_map(|record| record.keys()) {
        if !header.contains(key) && !dropped.contains(key) {
            dropped.push(key.clone());
        }
    }
    dropped
}

async fn read_header(path: &Path) -> Result<Option<Vec<String>>, DriverError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(row) => Ok(Some(row?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

fn encode(batch: &RecordBatch, header: &[String], with_header: bool) -> Result<Vec<u8>, DriverError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if with_header {
        writer.write_record(header)?;
    }
    for record in &batch.records {
        writer.write_record(
            header
                .iter()
                .map(|column| record.get(column).map(display_value).unwrap_or_default()),
        )?;
    }
    writer
        .into_inner()
        .map_err(|e| DriverError::Io(e.into_error()))
}
