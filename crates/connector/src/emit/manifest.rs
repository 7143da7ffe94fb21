use super::{Emitter, S3Emitter};
use crate::buffer::Buffer;
use crate::source::StreamSource;
use crate::transform::Transform;
use crate::Error;
use async_trait::async_trait;
use std::sync::Arc;

/// Emits a batch to the object store and then announces the uploaded file
/// path on a secondary stream, for a downstream manifest application to
/// pick up. The file path doubles as the partition key so announcements
/// for one batch land on one shard.
pub struct ManifestEmitter {
    pub output_stream: String,
    s3: S3Emitter,
    source: Arc<dyn StreamSource>,
}

impl ManifestEmitter {
    pub fn new(s3: S3Emitter, source: Arc<dyn StreamSource>, output_stream: impl Into<String>) -> Self {
        Self {
            output_stream: output_stream.into(),
            s3,
            source,
        }
    }
}

#[async_trait]
impl<M: Send + Sync> Emitter<M> for ManifestEmitter {
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
        let file = self.s3.file_name(first, last);

        self.source
            .put_record(
                &self.output_stream,
                &file,
                bytes::Bytes::from(file.clone()),
            )
            .await?;

        tracing::info!(
            file = %file,
            output_stream = %self.output_stream,
            shard_id,
            "announced batch file",
        );
        Ok(())
    }
}
