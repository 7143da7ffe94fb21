use crate::Error;
use std::collections::HashMap;
use std::sync::RwLock;

lazy_static::lazy_static! {
    static ref S3_PREFIX_MISSING: regex::Regex =
        regex::Regex::new("The specified S3 prefix '.*?' does not exist").unwrap();
}

/// Substrings that mark an otherwise-unclassified error as transient.
const TEXT_SIGNALS: [&str; 3] = [
    "Client.Timeout exceeded while reading body",
    "was not read from or written to within the timeout period",
    "Deadlock",
];

/// Error codes the stream service reports for transient failures.
/// `ExpiredIteratorException` is deliberately absent: the pipeline handles
/// it on a dedicated path that re-derives the cursor from the checkpoint.
const STREAM_CODES: [&str; 4] = [
    "ProvisionedThroughputExceededException",
    "InternalFailure",
    "Throttling",
    "ServiceUnavailable",
];

const OBJECT_STORE_CODES: [&str; 6] = [
    "ProvisionedThroughputExceededException",
    "InternalError",
    "InternalFailure",
    "Throttling",
    "ServiceUnavailable",
    "SlowDown",
];

pub type Recognizer = Box<dyn Fn(&Error) -> bool + Send + Sync>;

/// Decides whether an error is recoverable: true iff any registered
/// recognizer accepts it. Each recognizer is specialized to one error
/// family, and the registry may be extended (or overridden) under a name,
/// which tests use to install and later remove probes.
///
/// The registry is read-mostly; mutate it at startup only.
pub struct Classifier {
    recognizers: RwLock<HashMap<String, Recognizer>>,
}

impl Default for Classifier {
    fn default() -> Self {
        let classifier = Self::empty();
        classifier.register("stream-service", Box::new(stream_service));
        classifier.register("object-store", Box::new(object_store));
        classifier.register("network", Box::new(network));
        classifier.register("transport", Box::new(transport));
        classifier.register("warehouse", Box::new(warehouse));
        classifier.register("sql", Box::new(sql_transaction));
        classifier.register("text", Box::new(text_fallback));
        classifier
    }
}

impl Classifier {
    /// A classifier with no recognizers at all; everything is fatal.
    pub fn empty() -> Self {
        Self {
            recognizers: RwLock::new(HashMap::new()),
        }
    }

    /// Install `recognizer` under `name`, replacing any prior registration
    /// with that name.
    pub fn register(&self, name: &str, recognizer: Recognizer) {
        self.recognizers
            .write()
            .unwrap()
            .insert(name.to_string(), recognizer);
    }

    /// Remove the recognizer registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.recognizers.write().unwrap().remove(name).is_some()
    }

    pub fn is_recoverable(&self, err: &Error) -> bool {
        let recognizers = self.recognizers.read().unwrap();
        let recoverable = recognizers.values().any(|recognize| recognize(err));
        tracing::debug!(%err, recoverable, "classified error");
        recoverable
    }
}

fn stream_service(err: &Error) -> bool {
    match err {
        Error::Service(err) => {
            matches!(&err.code, Some(code) if STREAM_CODES.contains(&code.as_str()))
                || err.status == Some(500)
        }
        _ => false,
    }
}

fn object_store(err: &Error) -> bool {
    match err {
        Error::Service(err) => {
            matches!(&err.code, Some(code) if OBJECT_STORE_CODES.contains(&code.as_str()))
                || err.status == Some(500)
        }
        _ => false,
    }
}

fn network(err: &Error) -> bool {
    match err {
        Error::Io(err) => {
            err.kind() == std::io::ErrorKind::UnexpectedEof
                || err.to_string().contains("connection reset by peer")
        }
        Error::Service(err) => err.message.contains("connection reset by peer"),
        _ => false,
    }
}

fn transport(err: &Error) -> bool {
    matches!(err, Error::Service(err) if err.transport)
}

fn warehouse(err: &Error) -> bool {
    match err {
        Error::Sql(_) | Error::Other(_) => S3_PREFIX_MISSING.is_match(&err.to_string()),
        _ => false,
    }
}

fn sql_transaction(err: &Error) -> bool {
    match err {
        Error::Sql(_) => err.to_string().contains("current transaction is aborted"),
        _ => false,
    }
}

fn text_fallback(err: &Error) -> bool {
    let text = err.to_string();
    TEXT_SIGNALS.iter().any(|signal| text.contains(signal))
}
