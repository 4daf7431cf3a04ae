//! Postgres reader and writer
//!
//! Tables are addressed by the source/sink sub-resource. The writer stores
//! each record as a JSONB document in a generic landing table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS <table> (
//!     id BIGSERIAL PRIMARY KEY,
//!     record JSONB NOT NULL,
//!     loaded_at TIMESTAMPTZ NOT NULL
//! )
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use sluice_core::{Capability, DbProtocol, Record, RecordBatch, SinkTarget};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    BatchWriter, Reader, RecordStream, WriteTarget, Writer, expect_database, record_channel,
};
use crate::error::DriverError;

const PROTOCOL: DbProtocol = DbProtocol::Postgres;

async fn create_pool(connection: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(connection)
        .await
}

/// Quotes a table name, optionally schema-qualified
///
/// Only plain identifiers are accepted so the name can be spliced into SQL.
fn quote_table(name: &str) -> Result<String, DriverError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(DriverError::InvalidData(format!("invalid table name '{}'", name)));
    }

    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let valid = part
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(DriverError::InvalidData(format!("invalid table name '{}'", name)));
        }
        quoted.push(format!("\"{}\"", part));
    }
    Ok(quoted.join("."))
}

/// Reads every row of a table as a record
#[derive(Debug, Clone, Copy)]
pub struct PostgresReader {
    max_connections: u32,
}

impl Default for PostgresReader {
    fn default() -> Self {
        Self { max_connections: 2 }
    }
}

#[async_trait]
impl Reader for PostgresReader {
    fn capability(&self) -> Capability {
        Capability::Database(PROTOCOL)
    }

    async fn read(
        &self,
        location: &str,
        sub_resource: Option<&str>,
    ) -> Result<RecordStream, DriverError> {
        let table = sub_resource
            .ok_or_else(|| DriverError::InvalidData("postgres source needs a table".to_string()))?;
        let table = quote_table(table)?;

        let pool = create_pool(location, self.max_connections).await?;
        let (tx, stream) = record_channel();

        // The task owns the pool and closes it once the rows run out
        tokio::spawn(async move {
            let sql = format!("SELECT row_to_json(t) FROM {} t", table);
            let mut sent = 0usize;
            {
                let mut rows = sqlx::query_scalar::<_, Value>(&sql).fetch(&pool);
                while let Some(row) = rows.next().await {
                    let item = row.map_err(DriverError::from).and_then(row_record);
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        break;
                    }
                    sent += 1;
                }
            }
            pool.close().await;
            debug!(table = %table, rows = sent, "Read Postgres source");
        });

        Ok(stream)
    }
}

fn row_record(value: Value) -> Result<Record, DriverError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DriverError::InvalidData(format!(
            "expected a row object, got {}",
            other
        ))),
    }
}

/// Bulk-inserts batches into a JSONB landing table
#[derive(Debug, Clone, Copy)]
pub struct PostgresWriter {
    max_connections: u32,
}

impl Default for PostgresWriter {
    fn default() -> Self {
        Self { max_connections: 2 }
    }
}

#[async_trait]
impl Writer for PostgresWriter {
    fn capability(&self) -> Capability {
        Capability::Database(PROTOCOL)
    }

    async fn open(&self, target: &SinkTarget) -> Result<Box<dyn BatchWriter>, DriverError> {
        let SinkTarget::Database {
            connection,
            collection,
        } = target
        else {
            return Err(DriverError::Unsupported(
                "postgres writer cannot write to a file target".to_string(),
            ));
        };

        let table = quote_table(collection)?;
        let pool = create_pool(connection, self.max_connections).await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                record JSONB NOT NULL,
                loaded_at TIMESTAMPTZ NOT NULL
            )
            "#,
            table
        ))
        .execute(&pool)
        .await?;

        info!(table = %table, "Opened Postgres sink");
        Ok(Box::new(PostgresSession { pool }))
    }
}

struct PostgresSession {
    pool: PgPool,
}

#[async_trait]
impl BatchWriter for PostgresSession {
    async fn write(&mut self, batch: &RecordBatch, target: WriteTarget<'_>) -> Result<(), DriverError> {
        let (_connection, collection) = expect_database(&target, PROTOCOL)?;
        let table = quote_table(collection)?;
        let loaded_at = Utc::now();

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} (record, loaded_at) ", table));
        builder.push_values(&batch.records, |mut row, record: &Record| {
            row.push_bind(Json(record.clone())).push_bind(loaded_at);
        });

        let result = builder.build().execute(&self.pool).await?;
        debug!(
            table = %table,
            batch = batch.index,
            rows = result.rows_affected(),
            "Inserted batch"
        );
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.pool.close().await;
        Ok(())
    }
}
