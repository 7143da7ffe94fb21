use async_trait::async_trait;

mod kinesis;
pub use kinesis::KinesisSource;

/// Where a shard cursor should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorKind {
    /// Oldest record still retained.
    TrimHorizon,
    /// Only records written from now on.
    Latest,
    /// Strictly after the given sequence.
    AfterSequenceNumber(String),
}

/// One record as fetched from the stream.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub data: bytes::Bytes,
    pub sequence_number: String,
    /// Approximate arrival time at the service, seconds since the epoch.
    pub arrival_ts: i64,
}

/// Result of one fetch against a shard cursor.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    pub records: Vec<SourceRecord>,
    /// Cursor for the next fetch. `None` means the shard is closed
    /// (split or merged) and fully consumed.
    pub next_iterator: Option<String>,
    /// How far this cursor lags the shard's tip.
    pub millis_behind_latest: i64,
}

/// The partitioned, append-only stream being consumed. Cursors are opaque
/// single-use tokens: every fetch returns the cursor for the next one.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        kind: &IteratorKind,
    ) -> crate::Result<String>;

    async fn get_records(&self, iterator: &str, limit: u32) -> crate::Result<RecordSet>;

    /// Append one record to `stream_name`. Used by the manifest emitter to
    /// announce uploaded batch files on a secondary stream.
    async fn put_record(
        &self,
        stream_name: &str,
        partition_key: &str,
        data: bytes::Bytes,
    ) -> crate::Result<()>;
}
