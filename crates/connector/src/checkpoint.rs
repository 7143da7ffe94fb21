use async_trait::async_trait;

mod postgres;
mod rocks;
pub use postgres::PostgresCheckpointStore;
pub use rocks::RocksCheckpointStore;

/// Storage key for one shard's checkpoint.
pub fn checkpoint_key(app_name: &str, stream_name: &str, shard_id: &str) -> String {
    format!("{app_name}:checkpoint:{stream_name}:{shard_id}")
}

/// Durable record of per-shard progress. One store instance is shared by
/// every shard loop; rows are keyed by [`checkpoint_key`] and each row has
/// a single writer (the worker holding that shard's lease), which is what
/// keeps sequences monotonic.
///
/// Implementations absorb recoverable storage errors with their own
/// bounded, jittered retry. An unrecoverable storage error surfaces to the
/// caller and is fatal to the host: the loop cannot continue safely once
/// durability is in doubt.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether a checkpoint exists for this shard. On true, the row's
    /// sequence and closed flag are cached for the accessors below.
    async fn exists(&self, shard_id: &str) -> crate::Result<bool>;

    /// Sequence cached by the last `exists` call for this shard.
    fn sequence_number(&self, shard_id: &str) -> Option<String>;

    /// Closed flag cached by the last `exists` call for this shard.
    fn is_closed(&self, shard_id: &str) -> bool;

    /// Durably upsert this shard's checkpoint, clearing the closed flag.
    async fn set_checkpoint(&self, shard_id: &str, sequence: &str, arrival_ts: i64)
        -> crate::Result<()>;

    /// Durably upsert only the closed flag. Never regresses the sequence.
    async fn set_closed(&self, shard_id: &str, closed: bool) -> crate::Result<()>;

    /// Remove this shard's checkpoint. Returns whether a row existed.
    async fn delete(&self, shard_id: &str) -> crate::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key() {
        assert_eq!(
            checkpoint_key("app", "stream", "shard"),
            "app:checkpoint:stream:shard",
        );
    }
}
