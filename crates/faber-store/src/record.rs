//! # Records and Lookups
//!
//! A [`Record`] is identified by its id and carries a multi-valued attribute
//! map. The issuer writes single-element lists; readers use [`Record::first`]
//! and friends to pull the value back out.

use std::collections::BTreeMap;

use faber_core::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// An identifier-keyed record with a multi-valued attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record id.
    pub id: RecordId,
    /// Attribute key to list of values.
    pub attributes: BTreeMap<String, Vec<Value>>,
    /// When the record was first saved.
    pub created_at: Timestamp,
    /// When the record was last updated, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl Record {
    /// An empty record with the given id.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            created_at: Timestamp::now(),
            updated_at: None,
        }
    }

    /// Builder form of [`Record::set`].
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Store `value` under `key` as a single-element list, replacing any
    /// previous values.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), vec![value.into()]);
    }

    /// All values stored under `key`.
    pub fn values(&self, key: &str) -> Option<&[Value]> {
        self.attributes.get(key).map(Vec::as_slice)
    }

    /// The first value stored under `key`.
    pub fn first(&self, key: &str) -> Option<&Value> {
        self.values(key).and_then(<[Value]>::first)
    }

    /// The first value under `key`, if it is a string.
    pub fn first_str(&self, key: &str) -> Option<&str> {
        self.first(key).and_then(Value::as_str)
    }

    /// The first value under `key`, if it is a non-negative integer.
    pub fn first_u64(&self, key: &str) -> Option<u64> {
        self.first(key).and_then(Value::as_u64)
    }

    /// Replace the values of every key present in `other`; keys absent from
    /// `other` are left untouched.
    pub(crate) fn apply_update(&mut self, other: Record) {
        for (key, values) in other.attributes {
            self.attributes.insert(key, values);
        }
        self.updated_at = Some(Timestamp::now());
    }
}

/// Outcome of a point lookup.
///
/// `get_by_id` never raises. A missing record is [`Lookup::Absent`]; a
/// backend failure is [`Lookup::Failed`] so callers that care can tell the
/// two apart.
#[derive(Debug)]
pub enum Lookup {
    /// The record exists.
    Found(Record),
    /// No record with that id.
    Absent,
    /// The backend could not answer.
    Failed(StoreError),
}

impl Lookup {
    /// Whether the record was found.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Collapse to an `Option`, treating a backend failure as absence.
    ///
    /// The failure is logged at `warn` so it is not lost entirely.
    pub fn into_option(self) -> Option<Record> {
        match self {
            Self::Found(record) => Some(record),
            Self::Absent => None,
            Self::Failed(e) => {
                tracing::warn!(error = %e, "record lookup failed; treating as absent");
                None
            }
        }
    }

    /// Collapse to a `Result`, keeping backend failures as errors.
    pub fn into_result(self) -> Result<Option<Record>, StoreError> {
        match self {
            Self::Found(record) => Ok(Some(record)),
            Self::Absent => Ok(None),
            Self::Failed(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rid(s: &str) -> RecordId {
        RecordId::new(s).unwrap()
    }

    #[test]
    fn values_are_stored_as_single_element_lists() {
        let record = Record::new(rid("vc-count")).with_value("key", 0);
        assert_eq!(record.values("key"), Some(&[json!(0)][..]));
        assert_eq!(record.first_u64("key"), Some(0));
        assert_eq!(record.first_str("key"), None);
    }

    #[test]
    fn apply_update_replaces_only_supplied_keys() {
        let mut stored = Record::new(rid("user-schema"))
            .with_value("schemaId", "s-1")
            .with_value("name", "DIDI");
        let patch = Record::new(rid("user-schema")).with_value("schemaId", "s-2");

        stored.apply_update(patch);

        assert_eq!(stored.first_str("schemaId"), Some("s-2"));
        assert_eq!(stored.first_str("name"), Some("DIDI"));
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn failed_lookup_is_distinct_from_absent() {
        let failed = Lookup::Failed(StoreError::NotFound(rid("x")));
        assert!(failed.into_result().is_err());
        assert!(matches!(Lookup::Absent.into_result(), Ok(None)));

        let failed = Lookup::Failed(StoreError::NotFound(rid("x")));
        assert!(failed.into_option().is_none());
    }
}
