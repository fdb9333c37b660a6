//! Record store backing the authority.
//!
//! [`RecordStore`] is the only durable shared state in the system and is
//! written exclusively by the [`Authority`](crate::authority::Authority).
//! Two implementations are provided: [`MemoryStore`] keeps records in a map,
//! and [`JsonFileStore`] additionally rewrites a JSON snapshot file after
//! every mutation and reloads it on startup.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use taskboard_proto::task::{TaskId, TaskRecord};
use tokio::sync::{Mutex, RwLock};

/// Errors raised by a [`RecordStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error on {path}: {source}")]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backing file does not contain a valid record list.
    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// Records could not be serialized.
    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A record with this id already exists.
    #[error("duplicate task id: {0}")]
    Duplicate(TaskId),
}

/// Keyed storage for task records.
///
/// Each call is atomic on its own. Callers that need read-modify-write
/// atomicity per record (the authority) serialize access themselves.
pub trait RecordStore: Send + Sync {
    /// Inserts a new record. Fails with [`StoreError::Duplicate`] if the id exists.
    fn insert(&self, record: TaskRecord)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the record with the given id, if present.
    fn get(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<TaskRecord>, StoreError>> + Send;

    /// Stores `record`, replacing any record with the same id.
    fn put(&self, record: TaskRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes and returns the record with the given id, if present.
    fn remove(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<Option<TaskRecord>, StoreError>> + Send;

    /// Returns all records in creation order.
    fn list(&self) -> impl Future<Output = Result<Vec<TaskRecord>, StoreError>> + Send;
}

/// Sorts records by creation time, breaking ties by id (UUID v7 is
/// time-ordered).
fn creation_order(records: impl Iterator<Item = TaskRecord>) -> Vec<TaskRecord> {
    let mut list: Vec<TaskRecord> = records.collect();
    list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    list
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = TaskRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }
}

impl RecordStore for MemoryStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.records.write().await.insert(record.id, record);
        Ok(())
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.write().await.remove(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(creation_order(records.values().cloned()))
    }
}

/// Record store persisted as a JSON array in a single file.
///
/// Every mutation is applied to a copy of the record map, written to a
/// temporary file, and renamed over the snapshot. The in-memory map is only
/// replaced once the write succeeded, so a failed write leaves the store
/// unchanged.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading existing records. A missing file is
    /// treated as an empty store and created on the first write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Corrupt`] if it cannot be parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<TaskRecord> =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        tracing::info!(path = %path.display(), count = records.len(), "opened task store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `records` to the snapshot file via a temporary sibling.
    async fn persist(&self, records: &HashMap<TaskId, TaskRecord>) -> Result<(), StoreError> {
        let list = creation_order(records.values().cloned());
        let json = serde_json::to_vec_pretty(&list)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
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

    /// Applies `mutate` to a copy of the map, persists it, then commits.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut HashMap<TaskId, TaskRecord>) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let out = mutate(&mut next)?;
        self.persist(&next).await?;
        *records = next;
        drop(records);
        Ok(out)
    }
}

impl RecordStore for JsonFileStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.commit(move |records| {
            if records.contains_key(&record.id) {
                return Err(StoreError::Duplicate(record.id));
            }
            records.insert(record.id, record);
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.commit(move |records| {
            records.insert(record.id, record);
            Ok(())
        })
        .await
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let id = *id;
        {
            let records = self.records.lock().await;
            if !records.contains_key(&id) {
                return Ok(None);
            }
        }
        self.commit(move |records| Ok(records.remove(&id))).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(creation_order(records.values().cloned()))
    }
}
