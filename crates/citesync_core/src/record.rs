//! The opaque bibliographic payload.

use crate::error::CoreResult;
use citesync_protocol::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single synchronizable bibliographic record.
///
/// The sync subsystem treats records as opaque beyond equality,
/// hashability, and CBOR round-tripping. Fields live in a `BTreeMap` so
/// that insertion order is canonically insignificant: two records with the
/// same fields compare equal and hash identically regardless of the order
/// edits arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The entry type, e.g. `article` or `inproceedings`.
    pub entry_type: String,
    /// Field name to field value.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates an empty record of the given entry type.
    #[must_use]
    pub fn new(entry_type: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, returning the previous value if any.
    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.fields.insert(name.into(), value.into())
    }

    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Removes a field, returning its value if it was present.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Encodes the record to its wire payload.
    pub fn to_payload(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes a record from its wire payload.
    pub fn from_payload(bytes: &[u8]) -> CoreResult<Self> {
        Ok(from_cbor(bytes)?)
    }
}
