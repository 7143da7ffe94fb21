use std::time::Duration;

/// Per-stream settings shared by every shard loop of a [`crate::Pipeline`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Application name, the first component of every checkpoint key.
    pub app_name: String,
    /// Stream to consume.
    pub stream_name: String,
    /// Flush the buffer once this many distinct sequences are admitted.
    #[serde(default = "default_num_records_to_buffer")]
    pub num_records_to_buffer: usize,
    /// Also flush a non-empty buffer once it is older than this.
    /// Unset disables age-based flushing.
    #[serde(default, with = "humantime_serde")]
    pub max_time_between_flush: Option<Duration>,
    /// Admit filtered-out records without a body, so the checkpoint
    /// watermark advances past them.
    #[serde(default)]
    pub checkpoint_filtered_records: bool,
    /// Where to start reading a shard that has no checkpoint yet.
    #[serde(default)]
    pub initial_position: Option<InitialPosition>,
    /// Upper bound on records per fetch.
    #[serde(default = "default_get_records_limit")]
    pub get_records_limit: u32,
}

/// Starting position for a shard without a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialPosition {
    /// Oldest record still retained by the stream.
    TrimHorizon,
    /// Only records written after the loop starts.
    Latest,
}

fn default_num_records_to_buffer() -> usize {
    500
}

fn default_get_records_limit() -> u32 {
    10_000
}
