//! # faber-store — Record Store
//!
//! Generic persistence of identifier-keyed [`Record`]s whose attributes map
//! a string key to a list of JSON values. The issuer always stores exactly
//! one value per key, but the store is multi-valued by contract.
//!
//! ## Operations
//!
//! - [`RecordStore::save`] persists a new record and rejects duplicate ids.
//! - [`RecordStore::get_by_id`] returns a [`Lookup`]: `Found`, `Absent`, or
//!   `Failed`. It never returns an error; "not found" is a value, and an
//!   infrastructure failure is kept distinct from absence.
//! - [`RecordStore::update`] replaces the values of the keys present in the
//!   supplied record and fails if the id does not exist.
//!
//! ## Backends
//!
//! - [`InMemoryRecordStore`] for tests and ephemeral deployments.
//! - [`JsonFileRecordStore`] persists to a single JSON document, replaced
//!   atomically on every write, so state survives process restarts.
//!
//! ## Crate Policy
//!
//! - Depends only on `faber-core` internally.
//! - Locks are never held across `.await` in the in-memory backend.

pub mod error;
pub mod file;
pub mod memory;
pub mod record;

pub use error::StoreError;
pub use file::JsonFileRecordStore;
pub use memory::InMemoryRecordStore;
pub use record::{Lookup, Record};

use async_trait::async_trait;
use faber_core::RecordId;

/// Persistence contract for issuer records.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// async tasks behind an `Arc`. The trait is object-safe.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateId`] if a record with the same id exists.
    async fn save(&self, record: Record) -> Result<(), StoreError>;

    /// Point lookup. Never raises; see [`Lookup`].
    async fn get_by_id(&self, id: &RecordId) -> Lookup;

    /// Replace the values of every attribute key present in `record`,
    /// returning the stored record after the update.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if no record with that id exists.
    async fn update(&self, record: Record) -> Result<Record, StoreError>;
}
