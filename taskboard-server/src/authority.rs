//! The authority: single source of truth for task records.
//!
//! Every mutation is validated, committed to the [`RecordStore`], and on
//! success published as a [`BoardEvent`] through the injected [`Publisher`].
//! Rejected requests never touch the store and never produce a state-change
//! event.
//!
//! Operations on the same task id are serialized by a per-id async mutex held
//! across the read-modify-write and the publish, so events for one record
//! leave the authority in commit order. Operations on different ids run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use taskboard_proto::sync::{BoardEvent, ErrorKind, Reply, Request, RequestError};
use taskboard_proto::task::{
    TaskChanges, TaskDraft, TaskId, TaskPatch, TaskRecord, TaskStatus, ValidationError,
};
use tokio::sync::OwnedMutexGuard;

use crate::hub::Publisher;
use crate::store::{RecordStore, StoreError};

/// Errors returned to the issuing session.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// The request was malformed.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// The target id does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The record store failed; nothing was changed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl AuthorityError {
    /// Converts to the wire error sent back to the issuer.
    #[must_use]
    pub fn to_request_error(&self) -> RequestError {
        let kind = match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Store,
        };
        RequestError::new(kind, self.to_string())
    }
}

/// Result of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was removed and `deleted` was broadcast.
    Removed(TaskRecord),
    /// The record was already gone; nothing was broadcast.
    AlreadyGone,
}

/// Returns the current timestamp in milliseconds since epoch.
fn now_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}

/// Next modification time for a record last modified at `previous`.
fn next_update_time(previous: u64) -> u64 {
    now_ms().max(previous.saturating_add(1))
}

type LockTable = parking_lot::Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive access to one task id. Prunes its table entry on drop when no
/// other operation is waiting on it.
struct RecordGuard<'a> {
    table: &'a LockTable,
    id: TaskId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.table.lock();
        if table.get(&self.id).is_some_and(|m| Arc::strong_count(m) == 1) {
            table.remove(&self.id);
        }
    }
}

/// Validates, commits, and publishes task mutations.
pub struct Authority<S, P> {
    store: S,
    publisher: P,
    locks: LockTable,
}

impl<S: RecordStore, P: Publisher> Authority<S, P> {
    /// Creates an authority over `store` that announces changes via `publisher`.
    pub fn new(store: S, publisher: P) -> Self {
        Self {
            store,
            publisher,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// The underlying record store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Executes a wire request and maps the result to a [`Reply`].
    ///
    /// # Errors
    ///
    /// Returns the [`AuthorityError`] of the underlying operation.
    pub async fn handle(&self, request: Request) -> Result<Reply, AuthorityError> {
        match request {
            Request::ListAll => self.list_all().await.map(Reply::Tasks),
            Request::Create(draft) => self.create(draft).await.map(Reply::Task),
            Request::Update { id, patch } => self.update(id, patch).await.map(Reply::Task),
            Request::Move { id, status } => self
                .move_task(id, &status)
                .await
                .map(|status| Reply::Moved { id, status }),
            Request::Delete { id } => self.delete(id).await.map(|outcome| match outcome {
                DeleteOutcome::Removed(record) => Reply::Deleted(Some(record)),
                DeleteOutcome::AlreadyGone => Reply::Deleted(None),
            }),
        }
    }

    /// Returns every record in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Store`] if the store cannot be read.
    pub async fn list_all(&self) -> Result<Vec<TaskRecord>, AuthorityError> {
        Ok(self.store.list().await?)
    }

    /// Creates a record and broadcasts `created`.
    ///
    /// # Errors
    ///
    /// [`AuthorityError::Validation`] for a missing/empty title or unknown
    /// enum name, [`AuthorityError::Store`] if the write fails.
    pub async fn create(&self, draft: TaskDraft) -> Result<TaskRecord, AuthorityError> {
        let task = draft.validate()?;
        let id = TaskId::new();
        let _guard = self.lock(id).await;
        let record = TaskRecord::from_new(id, task, now_ms());
        let result = self.store.insert(record.clone()).await;
        self.commit("create", result).await?;

        tracing::info!(task_id = %id, title = %record.title, "task created");
        self.publisher
            .publish(BoardEvent::Created(record.clone()))
            .await;
        Ok(record)
    }

    /// Merges `patch` into an existing record and broadcasts `updated`.
    ///
    /// # Errors
    ///
    /// [`AuthorityError::Validation`], [`AuthorityError::NotFound`], or
    /// [`AuthorityError::Store`].
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<TaskRecord, AuthorityError> {
        let changes = patch.validate()?;
        let (record, _guard) = self.modify(id, "update", &changes).await?;

        tracing::info!(task_id = %id, "task updated");
        self.publisher
            .publish(BoardEvent::Updated(record.clone()))
            .await;
        Ok(record)
    }

    /// Changes only the status of a record and broadcasts `moved`.
    ///
    /// The status name is checked before the store is touched, so an
    /// invalid name fails even for an unknown id.
    ///
    /// # Errors
    ///
    /// [`AuthorityError::Validation`] for a status outside the three columns,
    /// [`AuthorityError::NotFound`], or [`AuthorityError::Store`].
    pub async fn move_task(&self, id: TaskId, status: &str) -> Result<TaskStatus, AuthorityError> {
        let status: TaskStatus = status.parse()?;
        let changes = TaskChanges {
            status: Some(status),
            ..TaskChanges::default()
        };
        let (_record, _guard) = self.modify(id, "move", &changes).await?;

        tracing::info!(task_id = %id, status = %status, "task moved");
        self.publisher
            .publish(BoardEvent::Moved { id, status })
            .await;
        Ok(status)
    }

    /// Removes a record and broadcasts `deleted`.
    ///
    /// Deleting an id that is already gone succeeds with
    /// [`DeleteOutcome::AlreadyGone`] and publishes nothing, so two racing
    /// deletes produce a single `deleted` event.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Store`] if the store fails.
    pub async fn delete(&self, id: TaskId) -> Result<DeleteOutcome, AuthorityError> {
        let _guard = self.lock(id).await;
        let result = self.store.remove(&id).await;
        let Some(record) = self.commit("delete", result).await? else {
            tracing::debug!(task_id = %id, "delete of absent task treated as no-op");
            return Ok(DeleteOutcome::AlreadyGone);
        };

        tracing::info!(task_id = %id, "task deleted");
        self.publisher.publish(BoardEvent::Deleted { id }).await;
        Ok(DeleteOutcome::Removed(record))
    }

    /// Read-modify-write of one record under its id lock. The guard is
    /// returned so the caller can publish before releasing it.
    async fn modify(
        &self,
        id: TaskId,
        op: &'static str,
        changes: &TaskChanges,
    ) -> Result<(TaskRecord, RecordGuard<'_>), AuthorityError> {
        let guard = self.lock(id).await;
        let current = self.store.get(&id).await;
        let Some(mut record) = self.commit(op, current).await? else {
            return Err(AuthorityError::NotFound(id));
        };
        changes.apply_to(&mut record);
        record.updated_at = next_update_time(record.updated_at);
        let result = self.store.put(record.clone()).await;
        self.commit(op, result).await?;
        Ok((record, guard))
    }

    /// Maps a store result, publishing a generic advisory on failure.
    async fn commit<T>(
        &self,
        op: &'static str,
        result: Result<T, StoreError>,
    ) -> Result<T, AuthorityError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::error!(op, error = %e, "record store failure");
                self.publisher
                    .publish(BoardEvent::Error {
                        message: format!("failed to {op} task"),
                    })
                    .await;
                Err(AuthorityError::Store(e))
            }
        }
    }

    /// Acquires exclusive access to `id`.
    async fn lock(&self, id: TaskId) -> RecordGuard<'_> {
        let mutex = Arc::clone(self.locks.lock().entry(id).or_default());
        let guard = mutex.lock_owned().await;
        RecordGuard {
            table: &self.locks,
            id,
            guard: Some(guard),
        }
    }
}
