//! # JSON-File Record Store
//!
//! Durable backend that keeps every record in one JSON document. The whole
//! document is rewritten on each `save` and `update`: it is written to a
//! sibling `*.tmp` file, synced to disk, and then renamed over the original,
//! so a crash mid-write leaves either the old or the new document, never a
//! torn one.
//!
//! The issuer holds two small records, so rewriting the document is cheap.
//! Reopening the same path restores all records, which is what lets the
//! credential-definition version counter survive process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use faber_core::RecordId;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::record::{Lookup, Record};
use crate::RecordStore;

/// Current on-disk document version.
const DOCUMENT_VERSION: u32 = 1;

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    records: BTreeMap<RecordId, Record>,
}

/// File-backed [`RecordStore`].
///
/// The in-memory copy is authoritative after [`JsonFileRecordStore::open`];
/// the async mutex serializes writers so document rewrites never interleave.
#[derive(Debug)]
pub struct JsonFileRecordStore {
    path: PathBuf,
    records: Mutex<BTreeMap<RecordId, Record>>,
}

impl JsonFileRecordStore {
    /// Open the store at `path`, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file exists but cannot be read,
    /// [`StoreError::Corrupt`] if it does not parse.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: StoreDocument =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                if doc.version != DOCUMENT_VERSION {
                    return Err(StoreError::Corrupt {
                        path,
                        reason: format!("unsupported document version {}", doc.version),
                    });
                }
                tracing::info!(
                    path = %path.display(),
                    records = doc.records.len(),
                    "record store loaded"
                );
                doc.records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "record store created");
                BTreeMap::new()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<RecordId, Record>) -> Result<(), StoreError> {
        let doc = StoreDocument {
            version: DOCUMENT_VERSION,
            records: records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        write_synced(&tmp, &bytes)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Writes `bytes` to `path` and flushes them to disk before returning.
async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn save(&self, record: Record) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id));
        }
        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.persist(&records).await {
            // Keep memory and disk in agreement.
            records.remove(&id);
            return Err(e);
        }
        tracing::debug!(record_id = %id, "record saved");
        Ok(())
    }

    async fn get_by_id(&self, id: &RecordId) -> Lookup {
        match self.records.lock().await.get(id) {
            Some(record) => Lookup::Found(record.clone()),
            None => Lookup::Absent,
        }
    }

    async fn update(&self, record: Record) -> Result<Record, StoreError> {
        let mut records = self.records.lock().await;
        let Some(stored) = records.get(&record.id) else {
            return Err(StoreError::NotFound(record.id));
        };
        let mut next = stored.clone();
        next.apply_update(record);

        let previous = records.insert(next.id.clone(), next.clone());
        if let Err(e) = self.persist(&records).await {
            if let Some(previous) = previous {
                records.insert(previous.id.clone(), previous);
            }
            return Err(e);
        }
        tracing::debug!(record_id = %next.id, "record updated");
        Ok(next)
    }
}
