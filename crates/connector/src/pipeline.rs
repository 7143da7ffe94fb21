use crate::buffer::{Buffer, RecordBuffer};
use crate::checkpoint::CheckpointStore;
use crate::config::{InitialPosition, PipelineConfig};
use crate::emit::Emitter;
use crate::lease::LeaseKeeper;
use crate::retry::Classifier;
use crate::source::{IteratorKind, SourceRecord, StreamSource};
use crate::transform::{Filter, Transform};
use crate::{backoff, Error};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive recoverable fetch errors tolerated before giving up.
const MAX_CONSECUTIVE_ERRORS: u32 = 50;
/// Rate-limit errors are routine; stay quiet for this many attempts.
const RATE_LIMIT_QUIET_ATTEMPTS: u32 = 6;
/// Cursor refreshes tolerated before giving up.
const MAX_CURSOR_EXPIRATIONS: u32 = 10;
/// A single fetch taking longer than this is worth a warning.
const SLOW_FETCH: Duration = Duration::from_secs(30);
/// Pause when a fetch comes back empty and the cursor is near the tip.
const IDLE_SLEEP: Duration = Duration::from_secs(5);
/// "Near the tip" for the idle pause.
const IDLE_THRESHOLD_MS: i64 = 10_000;

/// Drives one shard of the stream through transform, filter, buffer,
/// emitter, and checkpoint store. A single `Pipeline` serves every shard
/// of its stream; all per-shard mutable state (buffer, cursor, counters)
/// lives inside [`Pipeline::process_shard`], so concurrent calls for
/// disjoint shards are independent.
///
/// Delivery is at-least-once with per-shard ordering: the checkpoint is
/// written strictly after the emitter reports the batch durable, so a
/// crash between the two replays that batch on restart.
pub struct Pipeline<M: Send + Sync + 'static> {
    pub config: PipelineConfig,
    pub source: Arc<dyn StreamSource>,
    pub transform: Arc<dyn Transform<Model = M>>,
    pub filter: Arc<dyn Filter<M>>,
    pub emitter: Arc<dyn Emitter<M>>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub leases: Arc<dyn LeaseKeeper>,
    pub classifier: Arc<Classifier>,
}

impl<M: Send + Sync + 'static> Pipeline<M> {
    /// Process `shard_id` until the shard closes, the lease is lost, or a
    /// fatal error occurs. Closure and lost ownership return `Ok(())`;
    /// an `Err` means the host must stop (see [`crate::Supervisor`]).
    #[tracing::instrument(skip_all, fields(stream = %self.config.stream_name, shard_id = %shard_id))]
    pub async fn process_shard(&self, shard_id: &str) -> crate::Result<()> {
        let mut buffer = RecordBuffer::new(
            self.config.num_records_to_buffer,
            self.config.max_time_between_flush,
        );
        self.process_shard_with_buffer(shard_id, &mut buffer).await
    }

    /// As [`Pipeline::process_shard`], with a caller-provided buffer.
    pub async fn process_shard_with_buffer(
        &self,
        shard_id: &str,
        buffer: &mut dyn Buffer<M>,
    ) -> crate::Result<()> {
        if self.checkpoints.exists(shard_id).await? && self.checkpoints.is_closed(shard_id) {
            tracing::info!("shard checkpoint is closed; nothing to process");
            return Ok(());
        }

        let mut expirations = 0u32;
        loop {
            let cursor = self.acquire_cursor(shard_id).await?;

            match self
                .read_cursor(shard_id, cursor, buffer, &mut expirations)
                .await
            {
                Err(err) if err.is_cursor_expired() => {
                    expirations += 1;
                    if expirations > MAX_CURSOR_EXPIRATIONS {
                        return Err(Error::CursorExpirations { count: expirations });
                    }
                    tracing::warn!(%err, expirations, "shard cursor expired; re-deriving from checkpoint");
                }
                Err(Error::LostOwnership { .. }) => {
                    tracing::info!("lease no longer held; exiting shard loop");
                    return Ok(());
                }
                other => return other,
            }
        }
    }

    /// Request a fresh cursor: after the checkpointed sequence when one
    /// exists, else from the configured initial position, else from the
    /// oldest retained record.
    async fn acquire_cursor(&self, shard_id: &str) -> crate::Result<String> {
        let kind = if self.checkpoints.exists(shard_id).await? {
            let sequence = self
                .checkpoints
                .sequence_number(shard_id)
                .ok_or(Error::Protocol("checkpoint exists without a sequence"))?;
            IteratorKind::AfterSequenceNumber(sequence)
        } else {
            match self.config.initial_position {
                Some(InitialPosition::Latest) => IteratorKind::Latest,
                Some(InitialPosition::TrimHorizon) | None => IteratorKind::TrimHorizon,
            }
        };

        tracing::debug!(?kind, "requesting shard cursor");
        self.source
            .get_shard_iterator(&self.config.stream_name, shard_id, &kind)
            .await
    }

    /// Fetch-and-process loop over one cursor lineage. Returns `Ok` when
    /// the shard closes cleanly; cursor-expiration errors bubble up for
    /// the caller to re-derive a cursor.
    async fn read_cursor(
        &self,
        shard_id: &str,
        mut cursor: String,
        buffer: &mut dyn Buffer<M>,
        expirations: &mut u32,
    ) -> crate::Result<()> {
        let mut attempts = 0u32;

        loop {
            if attempts > MAX_CONSECUTIVE_ERRORS {
                return Err(Error::RetriesExhausted { attempts });
            }
            backoff::wait(attempts).await;

            let started = Instant::now();
            let fetched = self
                .source
                .get_records(&cursor, self.config.get_records_limit)
                .await;
            let elapsed = started.elapsed();
            if elapsed > SLOW_FETCH {
                tracing::warn!(elapsed_secs = elapsed.as_secs(), "slow record fetch");
            }

            let set = match fetched {
                Ok(set) => {
                    attempts = 0;
                    *expirations = 0;
                    set
                }
                Err(err) if self.classifier.is_recoverable(&err) => {
                    attempts += 1;
                    if err.is_rate_limited() && attempts <= RATE_LIMIT_QUIET_ATTEMPTS {
                        tracing::debug!(%err, attempts, "rate limited; backing off");
                    } else {
                        tracing::warn!(%err, attempts, "recoverable fetch error");
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };

            for record in &set.records {
                self.admit_record(record, buffer);
            }

            let next = match set.next_iterator {
                None => {
                    // Shard was split or merged and is fully consumed.
                    self.flush_buffer(shard_id, buffer).await?;
                    self.checkpoints.set_closed(shard_id, true).await?;
                    self.leases.release(shard_id).await?;
                    tracing::info!("shard closed");
                    return Ok(());
                }
                Some(next) if next == cursor => {
                    return Err(Error::Protocol("shard cursor did not advance"));
                }
                Some(next) => next,
            };

            if set.records.is_empty() && set.millis_behind_latest < IDLE_THRESHOLD_MS {
                tokio::time::sleep(IDLE_SLEEP).await;
            }

            if buffer.should_flush() {
                self.flush_buffer(shard_id, buffer).await?;
            }

            cursor = next;
        }
    }

    fn admit_record(&self, record: &SourceRecord, buffer: &mut dyn Buffer<M>) {
        let model = match self.transform.to_record(&record.data) {
            Ok(model) => model,
            Err(err) => {
                tracing::warn!(
                    sequence = %record.sequence_number,
                    %err,
                    "skipping undecodable record",
                );
                return;
            }
        };

        if self.filter.keep(&model) {
            buffer.process_record(Some(model), &record.sequence_number, record.arrival_ts);
        } else if self.config.checkpoint_filtered_records {
            buffer.process_record(None, &record.sequence_number, record.arrival_ts);
        }
    }

    /// Emit buffered records and checkpoint the high-water mark, in that
    /// order. Confirms lease ownership first: without it neither the emit
    /// nor the checkpoint may happen.
    async fn flush_buffer(
        &self,
        shard_id: &str,
        buffer: &mut dyn Buffer<M>,
    ) -> crate::Result<()> {
        if self.leases.currently_held(shard_id).await.is_none() {
            return Err(Error::LostOwnership {
                shard_id: shard_id.to_string(),
            });
        }

        if buffer.num_records() > 0 {
            self.emitter
                .emit(&*buffer, self.transform.as_ref(), shard_id)
                .await?;
        }

        if let Some(sequence) = buffer.last_sequence().map(str::to_owned) {
            self.checkpoints
                .set_checkpoint(shard_id, &sequence, buffer.last_arrival_ts())
                .await?;
        }

        buffer.flush();
        Ok(())
    }
}
