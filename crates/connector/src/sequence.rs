use bigdecimal::BigDecimal;

/// A sorted set of record sequences, compared as arbitrary-precision
/// decimals. Sequence strings routinely exceed 64 bits, and raw string
/// comparison would order "9" after "10".
#[derive(Debug, Default)]
pub struct SequenceSet(Vec<BigDecimal>);

impl SequenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `sequence`, keeping the set sorted. Returns false if it was
    /// already present. A sequence that fails to parse is never admitted.
    pub fn insert(&mut self, sequence: &str) -> bool {
        let Ok(value) = sequence.parse::<BigDecimal>() else {
            tracing::warn!(sequence, "cannot parse sequence as a decimal");
            return false;
        };
        match self.0.binary_search(&value) {
            Ok(_) => false,
            Err(index) => {
                self.0.insert(index, value);
                true
            }
        }
    }

    /// Whether `sequence` is present. A sequence that fails to parse
    /// reports as present, so callers never admit it.
    pub fn contains(&self, sequence: &str) -> bool {
        let Ok(value) = sequence.parse::<BigDecimal>() else {
            tracing::warn!(sequence, "cannot parse sequence as a decimal");
            return true;
        };
        self.0.binary_search(&value).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_dedup() {
        let mut set = SequenceSet::new();

        assert!(set.insert("102"));
        assert_eq!(set.len(), 1);
        assert!(set.contains("102"));
        assert!(!set.contains("500"));

        // A second insert of the same sequence is a no-op.
        assert!(!set.insert("102"));
        assert_eq!(set.len(), 1);

        // Inserts landing before, after, and between existing entries.
        assert!(set.insert("100"));
        assert!(set.insert("104"));
        assert!(set.insert("101"));
        assert_eq!(set.len(), 4);
        for sequence in ["100", "101", "102", "104"] {
            assert!(set.contains(sequence), "missing {sequence}");
        }
        assert!(!set.contains("103"));
    }

    #[test]
    fn test_decimal_ordering() {
        let mut set = SequenceSet::new();
        assert!(set.insert("9"));
        assert!(set.insert("10"));

        // Lexicographic comparison would conflate these; decimal must not.
        assert_eq!(set.0[0], "9".parse::<BigDecimal>().unwrap());
        assert_eq!(set.0[1], "10".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_beyond_u64() {
        // Kinesis sequences are 128-bit-plus decimal strings.
        let low = "49590338271490256608559692538361571095921575989136588898";
        let high = "49590338271490256608559692538361571095921575989136588899";

        let mut set = SequenceSet::new();
        assert!(set.insert(high));
        assert!(set.insert(low));
        assert!(set.contains(low));
        assert!(set.contains(high));
        assert_eq!(set.0[0], low.parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_unparseable() {
        let mut set = SequenceSet::new();
        assert!(!set.insert("not-a-number"));
        assert!(set.is_empty());
        // Reports as present so callers skip it rather than admit it.
        assert!(set.contains("not-a-number"));
    }
}
