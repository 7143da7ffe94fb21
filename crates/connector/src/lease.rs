use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

/// Read-through view of a shard lease held on our behalf by the external
/// coordinator.
#[derive(Debug, Clone)]
pub struct Lease {
    pub shard_id: String,
    pub owner: String,
}

/// The pipeline's narrow window onto lease coordination. The coordinator
/// owns acquisition, heartbeats, and eviction of stale leases; the
/// pipeline only ever asks whether it still holds a shard (before every
/// checkpoint write) and hands a shard back on normal closure.
#[async_trait]
pub trait LeaseKeeper: Send + Sync {
    /// Non-blocking. `None` means ownership was lost and the shard loop
    /// must stop without checkpointing.
    async fn currently_held(&self, shard_id: &str) -> Option<Lease>;

    /// Hand the shard back after it closed.
    async fn release(&self, shard_id: &str) -> crate::Result<()>;
}

/// [`LeaseKeeper`] for deployments with a single worker and no external
/// coordinator: every shard is held until released.
pub struct SoleOwner {
    owner: String,
    released: Mutex<HashSet<String>>,
}

impl SoleOwner {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            released: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl LeaseKeeper for SoleOwner {
    async fn currently_held(&self, shard_id: &str) -> Option<Lease> {
        if self.released.lock().unwrap().contains(shard_id) {
            return None;
        }
        Some(Lease {
            shard_id: shard_id.to_string(),
            owner: self.owner.clone(),
        })
    }

    async fn release(&self, shard_id: &str) -> crate::Result<()> {
        self.released.lock().unwrap().insert(shard_id.to_string());
        Ok(())
    }
}
