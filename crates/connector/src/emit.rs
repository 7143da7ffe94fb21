use crate::buffer::Buffer;
use crate::transform::Transform;
use async_trait::async_trait;

mod manifest;
mod s3;
mod warehouse;
pub use manifest::ManifestEmitter;
pub use s3::{S3Emitter, S3ObjectStore};
pub use warehouse::{CopyFormat, SqlWarehouse, WarehouseEmitter};

/// Attempts per emit before the last recoverable error surfaces.
const EMIT_ATTEMPTS: u32 = 10;

/// Drains a buffer to a sink as one batch. Returns `Ok` only once every
/// record in the batch is durable; the pipeline checkpoints strictly after
/// that, which is where the at-least-once guarantee comes from.
#[async_trait]
pub trait Emitter<M>: Send + Sync {
    async fn emit(
        &self,
        buffer: &dyn Buffer<M>,
        transform: &dyn Transform<Model = M>,
        shard_id: &str,
    ) -> crate::Result<()>;
}

/// Canned access policy for uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    Private,
    PublicRead,
}

/// Blob storage consumed by the batch-file emitters.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        content_type: &str,
        acl: ObjectAcl,
    ) -> crate::Result<()>;
}

/// SQL warehouse consumed by [`WarehouseEmitter`]. Loads run inside a
/// transaction so a failed COPY leaves nothing behind.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn begin(&self) -> crate::Result<Box<dyn WarehouseTxn>>;
}

#[async_trait]
pub trait WarehouseTxn: Send {
    async fn exec(&mut self, stmt: &str) -> crate::Result<()>;
    async fn commit(self: Box<Self>) -> crate::Result<()>;
    async fn rollback(self: Box<Self>) -> crate::Result<()>;
}
