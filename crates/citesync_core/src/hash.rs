//! Content hashing for out-of-band modification detection.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A digest of a record's content.
///
/// The digest covers only the record content, never the sync attributes
/// (id, revision, or the stored hash itself). It is compared against a
/// freshly computed hash at load time to detect modifications made while
/// the collection was not loaded; it is never used to order conflict
/// resolution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Creates a hash from raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Computes the content hash of a record.
///
/// Deterministic and order-independent with respect to field insertion
/// order (fields are hashed in their canonical sorted order). Every
/// component is length-prefixed so that adjacent fields cannot alias.
#[must_use]
pub fn hash_record(record: &Record) -> ContentHash {
    let mut hasher = Sha256::new();
    hash_component(&mut hasher, record.entry_type.as_bytes());
    for (name, value) in &record.fields {
        hash_component(&mut hasher, name.as_bytes());
        hash_component(&mut hasher, value.as_bytes());
    }
    ContentHash(hasher.finalize().into())
}

fn hash_component(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let record = Record::new("article").with_field("author", "Lamport");
        assert_eq!(hash_record(&record), hash_record(&record));
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let mut a = Record::new("article");
        a.set_field("author", "Lamport");
        a.set_field("year", "1978");

        let mut b = Record::new("article");
        b.set_field("year", "1978");
        b.set_field("author", "Lamport");

        assert_eq!(hash_record(&a), hash_record(&b));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = Record::new("article").with_field("year", "1978");
        let b = Record::new("article").with_field("year", "1979");
        assert_ne!(hash_record(&a), hash_record(&b));

        let c = Record::new("book").with_field("year", "1978");
        assert_ne!(hash_record(&a), hash_record(&c));
    }

    #[test]
    fn adjacent_fields_do_not_alias() {
        // "ab" + "c" must not hash like "a" + "bc".
        let a = Record::new("x").with_field("ab", "c");
        let b = Record::new("x").with_field("a", "bc");
        assert_ne!(hash_record(&a), hash_record(&b));
    }
}
