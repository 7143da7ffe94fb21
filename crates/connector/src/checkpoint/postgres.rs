use super::{checkpoint_key, CheckpointStore};
use crate::retry::Classifier;
use crate::{backoff, Error};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Attempts per storage operation before the last error surfaces.
const STORE_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
struct Cached {
    sequence_number: String,
    is_closed: bool,
}

/// [`CheckpointStore`] over a relational table, upserting on
/// `checkpoint_key`. The connection pool is shared across shards; every
/// statement touches a single row.
pub struct PostgresCheckpointStore {
    pool: sqlx::PgPool,
    app_name: String,
    stream_name: String,
    table_name: String,
    /// Recorded in the row's `server_id` column to identify the writer.
    server_id: String,
    classifier: Arc<Classifier>,
    cached: Mutex<HashMap<String, Cached>>,
}

impl PostgresCheckpointStore {
    pub fn new(
        pool: sqlx::PgPool,
        classifier: Arc<Classifier>,
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        table_name: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            app_name: app_name.into(),
            stream_name: stream_name.into(),
            table_name: table_name.into(),
            server_id: server_id.into(),
            classifier,
            cached: Mutex::new(HashMap::new()),
        }
    }

    /// Create the checkpoint table if it's missing.
    pub async fn ensure_table(&self) -> crate::Result<()> {
        let stmt = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                sequence_number TEXT NOT NULL DEFAULT '',
                checkpoint_key TEXT PRIMARY KEY,
                last_updated TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_arrival_time BIGINT NOT NULL DEFAULT 0,
                server_id TEXT NOT NULL DEFAULT '',
                is_closed BOOLEAN NOT NULL DEFAULT false
            )",
            self.table_name,
        );
        sqlx::query(&stmt).execute(&self.pool).await?;
        Ok(())
    }

    fn key(&self, shard_id: &str) -> String {
        checkpoint_key(&self.app_name, &self.stream_name, shard_id)
    }

    /// Run `operation` up to [`STORE_ATTEMPTS`] times, sleeping a jittered
    /// delay between attempts, while the classifier deems its error
    /// recoverable.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, f: F) -> crate::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let mut last = None;
        for attempt in 0..STORE_ATTEMPTS {
            backoff::wait(attempt).await;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if self.classifier.is_recoverable(&err) => {
                    tracing::warn!(operation, %err, attempt, "recoverable checkpoint store error");
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or(Error::RetriesExhausted {
            attempts: STORE_ATTEMPTS,
        }))
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn exists(&self, shard_id: &str) -> crate::Result<bool> {
        let key = self.key(shard_id);
        let stmt = format!(
            "SELECT sequence_number, is_closed FROM {} WHERE checkpoint_key = $1",
            self.table_name,
        );

        let row = self
            .with_retry("exists", || async {
                sqlx::query(&stmt)
                    .bind(&key)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(Error::from)
            })
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let sequence_number: String = row.try_get("sequence_number")?;
        let is_closed: bool = row.try_get("is_closed")?;

        // A row holding only a closed flag (no sequence, not closed) isn't
        // a usable checkpoint.
        if sequence_number.is_empty() && !is_closed {
            return Ok(false);
        }
        self.cached.lock().unwrap().insert(
            shard_id.to_string(),
            Cached {
                sequence_number,
                is_closed,
            },
        );
        Ok(true)
    }

    fn sequence_number(&self, shard_id: &str) -> Option<String> {
        self.cached
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|cached| cached.sequence_number.clone())
            .filter(|sequence| !sequence.is_empty())
    }

    fn is_closed(&self, shard_id: &str) -> bool {
        self.cached
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|cached| cached.is_closed)
            .unwrap_or(false)
    }

    async fn set_checkpoint(
        &self,
        shard_id: &str,
        sequence: &str,
        arrival_ts: i64,
    ) -> crate::Result<()> {
        let key = self.key(shard_id);
        let stmt = format!(
            "INSERT INTO {} (sequence_number, checkpoint_key, last_updated, last_arrival_time, server_id, is_closed)
             VALUES ($1, $2, now(), $3, $4, false)
             ON CONFLICT (checkpoint_key) DO UPDATE SET
                 sequence_number = excluded.sequence_number,
                 last_updated = excluded.last_updated,
                 last_arrival_time = excluded.last_arrival_time,
                 server_id = excluded.server_id,
                 is_closed = false",
            self.table_name,
        );

        self.with_retry("set_checkpoint", || async {
            sqlx::query(&stmt)
                .bind(sequence)
                .bind(&key)
                .bind(arrival_ts)
                .bind(&self.server_id)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await?;

        self.cached.lock().unwrap().insert(
            shard_id.to_string(),
            Cached {
                sequence_number: sequence.to_string(),
                is_closed: false,
            },
        );
        Ok(())
    }

    async fn set_closed(&self, shard_id: &str, closed: bool) -> crate::Result<()> {
        let key = self.key(shard_id);
        // The conflict arm touches only the flag, so an existing sequence
        // can't regress.
        let stmt = format!(
            "INSERT INTO {} (checkpoint_key, last_updated, server_id, is_closed)
             VALUES ($1, now(), $2, $3)
             ON CONFLICT (checkpoint_key) DO UPDATE SET
                 is_closed = excluded.is_closed,
                 last_updated = excluded.last_updated",
            self.table_name,
        );

        self.with_retry("set_closed", || async {
            sqlx::query(&stmt)
                .bind(&key)
                .bind(&self.server_id)
                .bind(closed)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            Ok(())
        })
        .await?;

        if let Some(cached) = self.cached.lock().unwrap().get_mut(shard_id) {
            cached.is_closed = closed;
        }
        Ok(())
    }

    async fn delete(&self, shard_id: &str) -> crate::Result<bool> {
        let key = self.key(shard_id);
        let stmt = format!("DELETE FROM {} WHERE checkpoint_key = $1", self.table_name);

        let deleted = self
            .with_retry("delete", || async {
                let result = sqlx::query(&stmt)
                    .bind(&key)
                    .execute(&self.pool)
                    .await
                    .map_err(Error::from)?;
                Ok(result.rows_affected() > 0)
            })
            .await?;

        self.cached.lock().unwrap().remove(shard_id);
        Ok(deleted)
    }
}
