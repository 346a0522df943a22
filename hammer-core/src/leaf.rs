//! Observed log entries.

use std::fmt;

use bytes::Bytes;

/// A leaf as seen by a reader, or as accepted by a write.
///
/// Leaves are created at the point of observation and consumed exactly once
/// by the duplicate analysis. They are never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Leaf {
    /// Position of the leaf in the log.
    pub index: u64,
    /// Raw leaf content.
    pub data: Bytes,
}

impl Leaf {
    /// Creates a new leaf observation.
    #[must_use]
    pub fn new(index: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("index", &self.index)
            .field("data", &String::from_utf8_lossy(&self.data))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_debug_shows_text() {
        let leaf = Leaf::new(7, &b"abc 7"[..]);
        let text = format!("{leaf:?}");
        assert!(text.contains("index: 7"));
        assert!(text.contains("abc 7"));
    }
}
