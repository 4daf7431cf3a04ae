//! Composed execution plan
//!
//! The plan is built once by `compose` and shared by every run of the
//! pipeline. It is immutable: all per-run state lives in [`RunContext`].
//!
//! A run reads the source to exhaustion, groups records into batches,
//! applies the transform chain to every record and hands each batch to the
//! writer in order. The writer session is always closed, also on failure.

use futures::StreamExt;
use sluice_core::{RecordBatch, SinkDescriptor, SinkTarget, SourceDescriptor};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::Batcher;
use crate::context::RunContext;
use crate::driver::{BatchWriter, Reader, RecordStream, WriteTarget, Writer};
use crate::error::{ExecutionError, Stage};
use crate::transform::TransformChain;

/// Linear source → batch → transform → sink plan
pub struct ExecutionPlan {
    source: SourceDescriptor,
    reader: Arc<dyn Reader>,
    transforms: TransformChain,
    sink: SinkDescriptor,
    writer: Arc<dyn Writer>,
}

impl ExecutionPlan {
    pub fn new(
        source: SourceDescriptor,
        reader: Arc<dyn Reader>,
        transforms: TransformChain,
        sink: SinkDescriptor,
        writer: Arc<dyn Writer>,
    ) -> Self {
        Self {
            source,
            reader,
            transforms,
            sink,
            writer,
        }
    }

    /// Executes the plan once
    ///
    /// Counters in `ctx` are updated as batches land, so a failed run still
    /// reports how far it got.
    pub async fn execute(&self, ctx: &mut RunContext) -> Result<(), ExecutionError> {
        let mut stream = self
            .reader
            .read(&self.source.location, self.source.sub_resource.as_deref())
            .await
            .map_err(|e| ExecutionError::new(Stage::Read, None, e))?;

        let mut session = self
            .writer
            .open(&self.sink.target)
            .await
            .map_err(|e| ExecutionError::new(Stage::Open, None, e))?;

        let result = self.drain(&mut stream, session.as_mut(), ctx).await;

        match (result, session.close().await) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(ExecutionError::new(Stage::Close, None, e)),
            (Err(e), close) => {
                if let Err(close_err) = close {
                    warn!(
                        run_id = %ctx.run_id(),
                        error = %close_err,
                        "Failed to close sink after error"
                    );
                }
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        stream: &mut RecordStream,
        session: &mut dyn BatchWriter,
        ctx: &mut RunContext,
    ) -> Result<(), ExecutionError> {
        let mut batcher = Batcher::new();
        let mut next_batch = 0;

        while let Some(item) = stream.next().await {
            let record =
                item.map_err(|e| ExecutionError::new(Stage::Read, Some(next_batch), e))?;
            if let Some(batch) = batcher.push(record) {
                next_batch = batch.index + 1;
                self.write_batch(batch, session, ctx).await?;
            }
        }

        if let Some(batch) = batcher.finish() {
            self.write_batch(batch, session, ctx).await?;
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        batch: RecordBatch,
        session: &mut dyn BatchWriter,
        ctx: &mut RunContext,
    ) -> Result<(), ExecutionError> {
        let batch = self.transforms.apply_batch(batch);
        let index = batch.index;

        let (target, file_sink) = match &self.sink.target {
            SinkTarget::File {
                directory,
                file_name,
            } => (
                WriteTarget::File {
                    path: directory.as_path(),
                    file_name: file_name.as_str(),
                    write_counter: ctx.write_counter(),
                },
                true,
            ),
            SinkTarget::Database {
                connection,
                collection,
            } => (
                WriteTarget::Database {
                    connection: connection.as_str(),
                    collection: collection.as_str(),
                },
                false,
            ),
        };

        session
            .write(&batch, target)
            .await
            .map_err(|e| ExecutionError::new(Stage::Write, Some(index), e))?;

        debug!(
            run_id = %ctx.run_id(),
            batch = index,
            records = batch.len(),
            write_counter = ctx.write_counter(),
            "Wrote batch"
        );
        ctx.batch_written(batch.len(), file_sink);
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("source", &self.source)
            .field("transforms", &self.transforms.names())
            .field("sink", &self.sink)
            .finish()
    }
}
