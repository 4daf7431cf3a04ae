//! JSON reader and writer

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use sluice_core::{Capability, FileFormat, Record, RecordBatch, SinkTarget};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::debug;

use super::{BatchWriter, Reader, RecordStream, WriteTarget, Writer, expect_file};
use crate::error::DriverError;

const FORMAT: FileFormat = FileFormat::Json;

/// Reads JSON objects from a file
///
/// Newline-delimited objects are streamed line by line. A top-level array
/// is one document and is parsed in full before the first record is yielded.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReader;

#[async_trait]
impl Reader for JsonReader {
    fn capability(&self) -> Capability {
        Capability::File(FORMAT)
    }

    async fn read(
        &self,
        location: &str,
        _sub_resource: Option<&str>,
    ) -> Result<RecordStream, DriverError> {
        let file = File::open(location).await?;
        debug!(location = %location, "Reading JSON source");
        read_records(BufReader::new(file)).await
    }
}

async fn read_records<R>(mut reader: R) -> Result<RecordStream, DriverError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    if first_byte(&mut reader).await? == Some(b'[') {
        let mut content = String::new();
        reader.read_to_string(&mut content).await?;
        let values: Vec<Value> = serde_json::from_str(&content)?;
        let records = values.into_iter().map(into_record);
        return Ok(Box::pin(stream::iter(records.collect::<Vec<_>>())));
    }

    Ok(Box::pin(stream::try_unfold(reader.lines(), next_line_record)))
}

/// Skips leading whitespace and peeks at the first byte of content
async fn first_byte<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<u8>, DriverError> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(None);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let byte = buf[pos];
                reader.consume(pos);
                return Ok(Some(byte));
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

async fn next_line_record<R>(mut lines: Lines<R>) -> Result<Option<(Record, Lines<R>)>, DriverError>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            let record = into_record(serde_json::from_str(trimmed)?)?;
            return Ok(Some((record, lines)));
        }
    }
    Ok(None)
}

fn into_record(value: Value) -> Result<Record, DriverError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DriverError::InvalidData(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Writes batches as newline-delimited JSON
///
/// Each record becomes one line, so appended batches keep the file valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWriter;

#[async_trait]
impl Writer for JsonWriter {
    fn capability(&self) -> Capability {
        Capability::File(FORMAT)
    }

    async fn open(&self, _target: &SinkTarget) -> Result<Box<dyn BatchWriter>, DriverError> {
        Ok(Box::new(JsonSession))
    }
}

struct JsonSession;

#[async_trait]
impl BatchWriter for JsonSession {
    async fn write(&mut self, batch: &RecordBatch, target: WriteTarget<'_>) -> Result<(), DriverError> {
        let (path, file_name, write_counter) = expect_file(&target, FORMAT)?;
        let full_path = path.join(file_name);

        let mut body = Vec::new();
        for record in &batch.records {
            serde_json::to_writer(&mut body, record)?;
            body.push(b'\n');
        }

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
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};
    use serde_json::json;

    async fn records_of(content: &'static str) -> Result<Vec<Record>, DriverError> {
        read_records(content.as_bytes()).await?.try_collect().await
    }

    #[tokio::test]
    async fn test_parse_array_and_ndjson() {
        let array = records_of(r#"  [{"a": 1}, {"a": 2}]"#).await.unwrap();
        let lines = records_of("\n{\"a\": 1}\n\n{\"a\": 2}\n").await.unwrap();
        assert_eq!(array, lines);
        assert_eq!(array[1]["a"], json!(2));

        assert!(records_of("").await.unwrap().is_empty());
        assert!(records_of(" \n\t\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parse_rejects_non_objects() {
        let err = records_of("[1, 2]").await.unwrap_err();
        assert!(matches!(err, DriverError::InvalidData(_)));

        let err = records_of("{\"a\": ").await.unwrap_err();
        assert!(matches!(err, DriverError::Json(_)));
    }

    #[tokio::test]
    async fn test_ndjson_yields_records_before_a_bad_line() {
        let items: Vec<Result<Record, DriverError>> = read_records(
            "{\"a\": 1}\nnot json\n{\"a\": 3}\n".as_bytes(),
        )
        .await
        .unwrap()
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap()["a"], json!(1));
        assert!(matches!(items[1], Err(DriverError::Json(_))));
    }

    #[tokio::test]
    async fn test_written_file_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SinkTarget::File {
            directory: dir.path().to_path_buf(),
            file_name: "out.json".to_string(),
        };
        let target = |counter| WriteTarget::File {
            path: dir.path(),
            file_name: "out.json",
            write_counter: counter,
        };

        let batch = |index: usize, ids: &[i64]| {
            let records = ids
                .iter()
                .map(|id| {
                    let mut r = Record::new();
                    r.insert("id".to_string(), json!(id));
                    r
                })
                .collect();
            RecordBatch::new(index, records)
        };

        let mut session = JsonWriter.open(&sink).await.unwrap();
        session.write(&batch(0, &[1, 2]), target(0)).await.unwrap();
        session.write(&batch(1, &[3]), target(1)).await.unwrap();
        session.close().await.unwrap();

        let path = dir.path().join("out.json");
        let rows: Vec<Record> = JsonReader
            .read(path.to_str().unwrap(), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        // A new run truncates
        let mut session = JsonWriter.open(&sink).await.unwrap();
        session.write(&batch(0, &[9]), target(0)).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "{\"id\":9}\n");
    }
}
