//! # In-Memory Record Store
//!
//! Thread-safe, cloneable store backed by a `HashMap`. All clones share the
//! same data. The `RwLock` is `parking_lot`, not `tokio::sync`, because it is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use faber_core::RecordId;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::record::{Lookup, Record};
use crate::RecordStore;

/// In-memory [`RecordStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    data: Arc<RwLock<HashMap<RecordId, Record>>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(&self, record: Record) -> Result<(), StoreError> {
        let mut guard = self.data.write();
        if guard.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        tracing::debug!(record_id = %record.id, "record saved");
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_by_id(&self, id: &RecordId) -> Lookup {
        match self.data.read().get(id) {
            Some(record) => Lookup::Found(record.clone()),
            None => Lookup::Absent,
        }
    }

    async fn update(&self, record: Record) -> Result<Record, StoreError> {
        let mut guard = self.data.write();
        match guard.get_mut(&record.id) {
            Some(stored) => {
                stored.apply_update(record);
                tracing::debug!(record_id = %stored.id, "record updated");
                Ok(stored.clone())
            }
            None => Err(StoreError::NotFound(record.id)),
        }
    }
}
