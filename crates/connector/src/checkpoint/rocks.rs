use super::{checkpoint_key, CheckpointStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Cached {
    sequence_number: String,
    is_closed: bool,
}

/// One shard's checkpoint as stored in the database.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CheckpointDoc {
    sequence_number: String,
    last_updated: chrono::DateTime<chrono::Utc>,
    last_arrival_time: i64,
    server_id: String,
    is_closed: bool,
}

/// [`CheckpointStore`] over an embedded RocksDB, for deployments without a
/// relational warehouse at hand. Each checkpoint is one JSON document
/// keyed by [`checkpoint_key`]. Storage errors are local and therefore
/// never recoverable: they surface immediately.
pub struct RocksCheckpointStore {
    db: rocksdb::DB,
    app_name: String,
    stream_name: String,
    server_id: String,
    cached: Mutex<HashMap<String, Cached>>,
}

impl RocksCheckpointStore {
    pub fn open(
        path: impl AsRef<Path>,
        app_name: impl Into<String>,
        stream_name: impl Into<String>,
        server_id: impl Into<String>,
    ) -> crate::Result<Self> {
        let mut options = rocksdb::Options::default();
        options.create_if_missing(true);
        let db = rocksdb::DB::open(&options, path)?;
        Ok(Self {
            db,
            app_name: app_name.into(),
            stream_name: stream_name.into(),
            server_id: server_id.into(),
            cached: Mutex::new(HashMap::new()),
        })
    }

    fn key(&self, shard_id: &str) -> String {
        checkpoint_key(&self.app_name, &self.stream_name, shard_id)
    }

    fn load(&self, shard_id: &str) -> crate::Result<Option<CheckpointDoc>> {
        match self.db.get_pinned(self.key(shard_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn store(&self, shard_id: &str, doc: &CheckpointDoc) -> crate::Result<()> {
        self.db
            .put(self.key(shard_id), serde_json::to_vec(doc)?)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for RocksCheckpointStore {
    async fn exists(&self, shard_id: &str) -> crate::Result<bool> {
        let Some(doc) = self.load(shard_id)? else {
            return Ok(false);
        };
        if doc.sequence_number.is_empty() && !doc.is_closed {
            return Ok(false);
        }
        self.cached.lock().unwrap().insert(
            shard_id.to_string(),
            Cached {
                sequence_number: doc.sequence_number,
                is_closed: doc.is_closed,
            },
        );
        Ok(true)
    }

    fn sequence_number(&self, shard_id: &str) -> Option<String> {
        self.cached
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|cached| cached.sequence_number.clone())
            .filter(|sequence| !sequence.is_empty())
    }

    fn is_closed(&self, shard_id: &str) -> bool {
        self.cached
            .lock()
            .unwrap()
            .get(shard_id)
            .map(|cached| cached.is_closed)
            .unwrap_or(false)
    }

    async fn set_checkpoint(
        &self,
        shard_id: &str,
        sequence: &str,
        arrival_ts: i64,
    ) -> crate::Result<()> {
        self.store(
            shard_id,
            &CheckpointDoc {
                sequence_number: sequence.to_string(),
                last_updated: chrono::Utc::now(),
                last_arrival_time: arrival_ts,
                server_id: self.server_id.clone(),
                is_closed: false,
            },
        )?;
        self.cached.lock().unwrap().insert(
            shard_id.to_string(),
            Cached {
                sequence_number: sequence.to_string(),
                is_closed: false,
            },
        );
        Ok(())
    }

    async fn set_closed(&self, shard_id: &str, closed: bool) -> crate::Result<()> {
        // Preserve the stored sequence; only the flag moves.
        let doc = match self.load(shard_id)? {
            Some(doc) => CheckpointDoc {
                last_updated: chrono::Utc::now(),
                is_closed: closed,
                ..doc
            },
            None => CheckpointDoc {
                sequence_number: String::new(),
                last_updated: chrono::Utc::now(),
                last_arrival_time: 0,
                server_id: self.server_id.clone(),
                is_closed: closed,
            },
        };
        self.store(shard_id, &doc)?;

        if let Some(cached) = self.cached.lock().unwrap().get_mut(shard_id) {
            cached.is_closed = closed;
        }
        Ok(())
    }

    async fn delete(&self, shard_id: &str) -> crate::Result<bool> {
        let existed = self.load(shard_id)?.is_some();
        self.db.delete(self.key(shard_id))?;
        self.cached.lock().unwrap().remove(shard_id);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> RocksCheckpointStore {
        RocksCheckpointStore::open(dir.path(), "app", "stream", "worker-1").unwrap()
    }

    #[tokio::test]
    async fn test_checkpoint_cycle() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(!store.exists("shard-0").await.unwrap());
        assert_eq!(store.sequence_number("shard-0"), None);

        store.set_checkpoint("shard-0", "102", 1700000000).await.unwrap();

        assert!(store.exists("shard-0").await.unwrap());
        assert_eq!(store.sequence_number("shard-0"), Some("102".to_string()));
        assert!(!store.is_closed("shard-0"));

        // Shards are independent rows.
        assert!(!store.exists("shard-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_closed_preserves_sequence() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set_checkpoint("shard-0", "500", 1700000000).await.unwrap();
        store.set_closed("shard-0", true).await.unwrap();

        assert!(store.exists("shard-0").await.unwrap());
        assert_eq!(store.sequence_number("shard-0"), Some("500".to_string()));
        assert!(store.is_closed("shard-0"));

        // A later checkpoint clears the flag again.
        store.set_checkpoint("shard-0", "501", 1700000100).await.unwrap();
        assert!(store.exists("shard-0").await.unwrap());
        assert!(!store.is_closed("shard-0"));
    }

    #[tokio::test]
    async fn test_closed_without_sequence_still_exists() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set_closed("shard-0", true).await.unwrap();
        assert!(store.exists("shard-0").await.unwrap());
        assert!(store.is_closed("shard-0"));
        assert_eq!(store.sequence_number("shard-0"), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);

        store.set_checkpoint("shard-0", "102", 0).await.unwrap();
        assert!(store.delete("shard-0").await.unwrap());
        assert!(!store.delete("shard-0").await.unwrap());
        assert!(!store.exists("shard-0").await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.set_checkpoint("shard-0", "900", 1700000000).await.unwrap();
        }
        let store = open_store(&dir);
        assert!(store.exists("shard-0").await.unwrap());
        assert_eq!(store.sequence_number("shard-0"), Some("900".to_string()));
    }
}
