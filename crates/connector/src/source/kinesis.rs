use super::{IteratorKind, RecordSet, SourceRecord, StreamSource};
use crate::{Error, ServiceError};
use async_trait::async_trait;
use aws_sdk_kinesis::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::ShardIteratorType;

/// [`StreamSource`] backed by the AWS Kinesis SDK client.
#[derive(Clone)]
pub struct KinesisSource {
    client: aws_sdk_kinesis::Client,
}

impl KinesisSource {
    pub fn new(client: aws_sdk_kinesis::Client) -> Self {
        Self { client }
    }

    /// Build a client from ambient AWS configuration (environment,
    /// profile, or instance role).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_kinesis::Client::new(&config))
    }
}

#[async_trait]
impl StreamSource for KinesisSource {
    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        kind: &IteratorKind,
    ) -> crate::Result<String> {
        let mut request = self
            .client
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id);

        request = match kind {
            IteratorKind::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            IteratorKind::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            IteratorKind::AfterSequenceNumber(sequence) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence),
        };

        let output = request.send().await.map_err(sdk_error)?;
        output
            .shard_iterator()
            .map(str::to_owned)
            .ok_or(Error::Protocol("GetShardIterator returned no iterator"))
    }

    async fn get_records(&self, iterator: &str, limit: u32) -> crate::Result<RecordSet> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator)
            .limit(limit as i32)
            .send()
            .await
            .map_err(sdk_error)?;

        let records = output
            .records()
            .iter()
            .map(|record| SourceRecord {
                data: bytes::Bytes::copy_from_slice(record.data().as_ref()),
                sequence_number: record.sequence_number().to_string(),
                arrival_ts: record
                    .approximate_arrival_timestamp()
                    .map(|ts| ts.secs())
                    .unwrap_or(0),
            })
            .collect();

        Ok(RecordSet {
            records,
            // The service signals shard closure with a missing or empty
            // next iterator.
            next_iterator: output
                .next_shard_iterator()
                .filter(|iterator| !iterator.is_empty())
                .map(str::to_owned),
            millis_behind_latest: output.millis_behind_latest().unwrap_or(0),
        })
    }

    async fn put_record(
        &self,
        stream_name: &str,
        partition_key: &str,
        data: bytes::Bytes,
    ) -> crate::Result<()> {
        self.client
            .put_record()
            .stream_name(stream_name)
            .partition_key(partition_key)
            .data(Blob::new(data.to_vec()))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

/// Lower an SDK error into [`ServiceError`], preserving the service error
/// code, the HTTP status when a response was received, and whether the
/// failure never left the transport layer.
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
