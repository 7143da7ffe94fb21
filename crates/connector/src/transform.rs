/// Decodes stream payloads into a model type and encodes them back for
/// emit. The round trip may be lossy; emitters only require that
/// `from_record` produces whatever bytes the sink should store.
pub trait Transform: Send + Sync {
    type Model: Send + Sync;

    fn to_record(&self, data: &[u8]) -> crate::Result<Self::Model>;
    fn from_record(&self, record: &Self::Model) -> Vec<u8>;
}

/// Pure predicate deciding which records reach the buffer.
pub trait Filter<M>: Send + Sync {
    fn keep(&self, record: &M) -> bool;
}

/// A [`Filter`] that keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAll;

impl<M> Filter<M> for KeepAll {
    fn keep(&self, _record: &M) -> bool {
        true
    }
}

/// JSON documents, one per line in emitted batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLines;

impl Transform for JsonLines {
    type Model = serde_json::Value;

    fn to_record(&self, data: &[u8]) -> crate::Result<Self::Model> {
        Ok(serde_json::from_slice(data)?)
    }

    fn from_record(&self, record: &Self::Model) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(record).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }
}

/// Opaque payloads carried through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Transform for PassThrough {
    type Model = bytes::Bytes;

    fn to_record(&self, data: &[u8]) -> crate::Result<Self::Model> {
        Ok(bytes::Bytes::copy_from_slice(data))
    }

    fn from_record(&self, record: &Self::Model) -> Vec<u8> {
        record.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines() {
        let transform = JsonLines;

        let record = transform.to_record(br#"{"id": 7}"#).unwrap();
        assert_eq!(record["id"], 7);
        assert_eq!(transform.from_record(&record), b"{\"id\":7}\n");

        assert!(transform.to_record(b"not json").is_err());
    }

    #[test]
    fn test_pass_through() {
        let transform = PassThrough;
        let record = transform.to_record(b"payload").unwrap();
        assert_eq!(transform.from_record(&record), b"payload");
    }
}
