use super::{Emitter, S3Emitter, Warehouse, WarehouseTxn, EMIT_ATTEMPTS};
use crate::buffer::Buffer;
use crate::retry::Classifier;
use crate::transform::Transform;
use crate::{backoff, Error};
use async_trait::async_trait;
use std::sync::Arc;

/// COPY statement format clause.
#[derive(Debug, Clone)]
pub enum CopyFormat {
    /// `json 'auto'`
    Json,
    /// `json '{paths}'`, pointing at a jsonpaths file.
    JsonPaths(String),
    /// `DELIMITER '{d}'`
    Delimited(String),
}

/// Emits a batch by uploading it to the object store and then issuing a
/// COPY referencing the uploaded file, inside a transaction. The COPY has
/// its own retry loop: the uploaded object may not be visible to the
/// warehouse immediately, which the classifier reports as recoverable.
pub struct WarehouseEmitter {
    pub table_name: String,
    pub format: CopyFormat,
    s3: S3Emitter,
    warehouse: Arc<dyn Warehouse>,
    classifier: Arc<Classifier>,
}

impl WarehouseEmitter {
    pub fn new(
        s3: S3Emitter,
        warehouse: Arc<dyn Warehouse>,
        classifier: Arc<Classifier>,
        table_name: impl Into<String>,
        format: CopyFormat,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            format,
            s3,
            warehouse,
            classifier,
        }
    }

    fn copy_statement(&self, file: &str) -> String {
        let format_clause = match &self.format {
            CopyFormat::Json => "json 'auto'".to_string(),
            CopyFormat::JsonPaths(paths) => format!("json '{paths}'"),
            CopyFormat::Delimited(delimiter) => format!("DELIMITER '{delimiter}'"),
        };
        format!(
            "COPY {} FROM 's3://{}/{}' CREDENTIALS 'aws_access_key_id={};aws_secret_access_key={}' {};",
            self.table_name,
            self.s3.bucket,
            file,
            copy_credential("AWS_ACCESS_KEY", "AWS_ACCESS_KEY_ID"),
            copy_credential("AWS_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"),
            format_clause,
        )
    }

    /// One transactional COPY: rollback on error, commit on success. A
    /// rollback failure is classified like any other error; when it's not
    /// recoverable it takes precedence over the load error.
    async fn load(&self, stmt: &str) -> crate::Result<()> {
        let mut txn = self.warehouse.begin().await?;
        match txn.exec(stmt).await {
            Ok(()) => txn.commit().await,
            Err(exec_err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    if !self.classifier.is_recoverable(&rollback_err) {
                        return Err(rollback_err);
                    }
                    tracing::warn!(%rollback_err, "rollback failed after load error");
                }
                Err(exec_err)
            }
        }
    }
}

#[async_trait]
impl<M: Send + Sync> Emitter<M> for WarehouseEmitter {
    async fn emit(
        &self,
        buffer: &dyn Buffer<M>,
        transform: &dyn Transform<Model = M>,
        shard_id: &str,
    ) -> crate::Result<()> {
        self.s3.emit(buffer, transform, shard_id).await?;

        let first = buffer
            .first_sequence()
            .ok_or(Error::Protocol("emit of an empty buffer"))?;
        let last = buffer
            .last_sequence()
            .ok_or(Error::Protocol("emit of an empty buffer"))?;
        let stmt = self.copy_statement(&self.s3.file_name(first, last));

        let mut final_err = None;
        for attempt in 0..EMIT_ATTEMPTS {
            backoff::wait(attempt).await;

            match self.load(&stmt).await {
                Ok(()) => {
                    tracing::debug!(shard_id, table = %self.table_name, "warehouse load complete");
                    return Ok(());
                }
                Err(err) if self.classifier.is_recoverable(&err) => {
                    tracing::warn!(shard_id, %err, attempt, "recoverable warehouse load error");
                    final_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(final_err.unwrap_or(Error::RetriesExhausted {
            attempts: EMIT_ATTEMPTS,
        }))
    }
}

fn copy_credential(name: &str, standard_name: &str) -> String {
    std::env::var(name)
        .or_else(|_| std::env::var(standard_name))
        .unwrap_or_default()
}

/// [`Warehouse`] over a Postgres-protocol connection pool (Redshift speaks
/// the same wire protocol).
pub struct SqlWarehouse {
    pool: sqlx::PgPool,
}

impl SqlWarehouse {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Warehouse for SqlWarehouse {
    async fn begin(&self) -> crate::Result<Box<dyn WarehouseTxn>> {
        let txn = self.pool.begin().await?;
        Ok(Box::new(SqlTxn { txn }))
    }
}

struct SqlTxn {
    txn: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl WarehouseTxn for SqlTxn {
    async fn exec(&mut self, stmt: &str) -> crate::Result<()> {
        sqlx::query(stmt).execute(&mut self.txn).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> crate::Result<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> crate::Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{ObjectAcl, ObjectStore};
    use crate::retry::Classifier;

    struct NullStore;

    #[async_trait]
    impl ObjectStore for NullStore {
        async fn put(
            &self,
            _bucket: &str,
            _key: &str,
            _body: &[u8],
            _content_type: &str,
            _acl: ObjectAcl,
        ) -> crate::Result<()> {
            Ok(())
        }
    }

    struct NullWarehouse;

    #[async_trait]
    impl Warehouse for NullWarehouse {
        async fn begin(&self) -> crate::Result<Box<dyn WarehouseTxn>> {
            Err(Error::Protocol("unused"))
        }
    }

    fn emitter(format: CopyFormat) -> WarehouseEmitter {
        let classifier = Arc::new(Classifier::default());
        let s3 = S3Emitter::new(
            Arc::new(NullStore),
            classifier.clone(),
            "test_bucket",
            None,
        );
        WarehouseEmitter::new(s3, Arc::new(NullWarehouse), classifier, "test_table", format)
    }

    #[test]
    fn test_copy_statement() {
        std::env::remove_var("AWS_ACCESS_KEY");
        std::env::remove_var("AWS_SECRET_KEY");
        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");

        assert_eq!(
            emitter(CopyFormat::Delimited(",".to_string())).copy_statement("test.txt"),
            "COPY test_table FROM 's3://test_bucket/test.txt' \
             CREDENTIALS 'aws_access_key_id=;aws_secret_access_key=' DELIMITER ',';",
        );
        assert_eq!(
            emitter(CopyFormat::Json).copy_statement("test.txt"),
            "COPY test_table FROM 's3://test_bucket/test.txt' \
             CREDENTIALS 'aws_access_key_id=;aws_secret_access_key=' json 'auto';",
        );
        assert_eq!(
            emitter(CopyFormat::JsonPaths("s3://test_bucket/paths.json".to_string()))
                .copy_statement("test.txt"),
            "COPY test_table FROM 's3://test_bucket/test.txt' \
             CREDENTIALS 'aws_access_key_id=;aws_secret_access_key=' \
             json 's3://test_bucket/paths.json';",
        );
    }
}
