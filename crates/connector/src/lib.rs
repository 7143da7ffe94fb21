pub mod backoff;
mod buffer;
pub mod checkpoint;
mod config;
pub mod emit;
mod lease;
mod pipeline;
pub mod retry;
mod sequence;
pub mod source;
mod transform;
mod worker;

pub use buffer::{Buffer, RecordBuffer};
pub use config::{InitialPosition, PipelineConfig};
pub use lease::{Lease, LeaseKeeper, SoleOwner};
pub use pipeline::Pipeline;
pub use sequence::SequenceSet;
pub use transform::{Filter, JsonLines, KeepAll, PassThrough, Transform};
pub use worker::Supervisor;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure reported by a remote service (stream source or object store),
    /// carrying whatever error code and HTTP status the service attached.
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The lease coordinator no longer holds this shard for us.
    /// Treated as a clean exit of the shard loop, never as a failure.
    #[error("lost ownership of shard {shard_id}")]
    LostOwnership { shard_id: String },
    #[error("{0}")]
    Protocol(&'static str),
    #[error("{attempts} consecutive recoverable errors without progress")]
    RetriesExhausted { attempts: u32 },
    #[error("shard cursor expired {count} times without progress")]
    CursorExpirations { count: u32 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The service told us the iterator expired; the cursor must be
    /// re-derived from the last checkpoint.
    pub fn is_cursor_expired(&self) -> bool {
        matches!(self, Error::Service(err)
            if err.code.as_deref() == Some("ExpiredIteratorException"))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Service(err)
            if err.code.as_deref() == Some("ProvisionedThroughputExceededException"))
    }
}

/// Error detail reported by a remote service call.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// Service-assigned error code, e.g. "Throttling".
    pub code: Option<String>,
    /// HTTP status of the response, when one was received.
    pub status: Option<u16>,
    /// The request never produced a service response (dial, TLS, or
    /// timeout failure in the transport layer).
    pub transport: bool,
    pub message: String,
}

impl ServiceError {
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            status: None,
            transport: false,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: Some(status),
            transport: false,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            transport: true,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, self.status) {
            (Some(code), _) => write!(f, "{} ({})", self.message, code),
            (None, Some(status)) => write!(f, "{} (http status {})", self.message, status),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ServiceError {}
