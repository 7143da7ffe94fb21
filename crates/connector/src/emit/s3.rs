use super::{Emitter, ObjectAcl, ObjectStore, EMIT_ATTEMPTS};
use crate::buffer::Buffer;
use crate::retry::Classifier;
use crate::transform::Transform;
use crate::{backoff, Error, ServiceError};
use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use std::sync::Arc;

/// Emits each batch as one object. The key is derived from the emit date
/// and the batch's first and last sequences, which makes it unique per
/// shard per batch and groups a day's batches under one prefix.
pub struct S3Emitter {
    pub bucket: String,
    pub prefix: Option<String>,
    store: Arc<dyn ObjectStore>,
    classifier: Arc<Classifier>,
}

impl S3Emitter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        classifier: Arc<Classifier>,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix,
            store,
            classifier,
        }
    }

    /// `{prefix?}/YYYY/MM/DD/{first_sequence}-{last_sequence}`, dated with
    /// the UTC day of the emit.
    pub fn file_name(&self, first_sequence: &str, last_sequence: &str) -> String {
        let date = chrono::Utc::now().format("%Y/%m/%d");
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{date}/{first_sequence}-{last_sequence}"),
            None => format!("{date}/{first_sequence}-{last_sequence}"),
        }
    }
}

#[async_trait]
impl<M: Send + Sync> Emitter<M> for S3Emitter {
    async fn emit(
        &self,
        buffer: &dyn Buffer<M>,
        transform: &dyn Transform<Model = M>,
        shard_id: &str,
    ) -> crate::Result<()> {
        let first = buffer
            .first_sequence()
            .ok_or(Error::Protocol("emit of an empty buffer"))?;
        let last = buffer
            .last_sequence()
            .ok_or(Error::Protocol("emit of an empty buffer"))?;
        let key = self.file_name(first, last);

        let mut body = Vec::new();
        for record in buffer.records() {
            body.extend_from_slice(&transform.from_record(record));
        }

        let mut final_err = None;
        for attempt in 0..EMIT_ATTEMPTS {
            backoff::wait(attempt).await;

            match self
                .store
                .put(&self.bucket, &key, &body, "text/plain", ObjectAcl::Private)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        records = buffer.num_records(),
                        bucket = %self.bucket,
                        key = %key,
                        shard_id,
                        "emitted batch",
                    );
                    return Ok(());
                }
                Err(err) if self.classifier.is_recoverable(&err) => {
                    tracing::warn!(shard_id, %err, attempt, "recoverable object store error");
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

/// [`ObjectStore`] backed by the AWS S3 SDK client.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        acl: ObjectAcl,
    ) -> crate::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_type(content_type)
            .acl(match acl {
                ObjectAcl::Private => ObjectCannedAcl::Private,
                ObjectAcl::PublicRead => ObjectCannedAcl::PublicRead,
            })
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

fn sdk_error<E>(err: SdkError<E>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = err.code().map(str::to_owned);
    let message = err
        .message()
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string());
    let (status, transport) = match &err {
        SdkError::ServiceError(context) => (Some(context.raw().status().as_u16()), false),
        SdkError::ResponseError(context) => (Some(context.raw().status().as_u16()), true),
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => (None, true),
        _ => (None, false),
    };
    Error::Service(ServiceError {
        code,
        status,
        transport,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn emitter(prefix: Option<String>) -> S3Emitter {
        S3Emitter::new(
            Arc::new(NullStore),
            Arc::new(Classifier::default()),
            "bucket",
            prefix,
        )
    }

    #[test]
    fn test_file_name() {
        let dated = regex::Regex::new(r"^\d{4}/\d{2}/\d{2}/100-102$").unwrap();
        assert!(dated.is_match(&emitter(None).file_name("100", "102")));

        let prefixed = regex::Regex::new(r"^batches/\d{4}/\d{2}/\d{2}/100-102$").unwrap();
        assert!(prefixed.is_match(
            &emitter(Some("batches".to_string())).file_name("100", "102")
        ));
    }
}
