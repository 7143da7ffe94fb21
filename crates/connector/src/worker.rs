use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Pause before exiting on a fatal error, so tracing subscribers flush.
const EXIT_DELAY: Duration = Duration::from_secs(1);

/// Runs one task per shard over a shared [`Pipeline`] and enforces the
/// propagation policy: a shard loop ending in `Err` has broken the
/// durability invariant, and silent continuation would risk data loss, so
/// the whole process terminates. Shard loops ending `Ok` (closure, lost
/// lease) simply finish.
pub struct Supervisor<M: Send + Sync + 'static> {
    pipeline: Arc<Pipeline<M>>,
}

impl<M: Send + Sync + 'static> Supervisor<M> {
    pub fn new(pipeline: Pipeline<M>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    /// Process every shard in `shard_ids` to completion.
    pub async fn run(&self, shard_ids: Vec<String>) {
        let mut tasks = JoinSet::new();

        for shard_id in shard_ids {
            let pipeline = self.pipeline.clone();
            tasks.spawn(async move {
                if let Err(err) = pipeline.process_shard(&shard_id).await {
                    fatal(&shard_id, &err).await;
                }
                tracing::info!(shard_id = %shard_id, "shard loop finished");
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(%err, "shard task panicked; terminating");
                tokio::time::sleep(EXIT_DELAY).await;
                std::process::exit(1);
            }
        }
    }
}

async fn fatal(shard_id: &str, err: &crate::Error) {
    tracing::error!(shard_id, %err, "fatal shard error; terminating");
    tokio::time::sleep(EXIT_DELAY).await;
    std::process::exit(1);
}
