//! Ordered, per-session projection of the board.

use std::collections::HashSet;

use taskboard_proto::task::{TaskId, TaskRecord, TaskStatus};

/// The records a session currently shows, newest creations first.
///
/// Entries inserted by an optimistic create carry a client-generated id and
/// are tracked as provisional until the authority's record replaces them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardView {
    records: Vec<TaskRecord>,
    provisional: HashSet<TaskId>,
}

impl BoardView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole view with a snapshot, verbatim.
    pub fn replace_all(&mut self, records: Vec<TaskRecord>) {
        self.records = records;
        self.provisional.clear();
    }

    /// All records in display order.
    #[must_use]
    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }

    /// Number of records, provisional ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the view holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record with `id`, if shown.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.records.iter().find(|r| r.id == *id)
    }

    /// Returns `true` if a record with `id` is shown.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.position(id).is_some()
    }

    /// Returns `true` if `id` belongs to an unconfirmed optimistic create.
    #[must_use]
    pub fn is_provisional(&self, id: &TaskId) -> bool {
        self.provisional.contains(id)
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.records.iter().position(|r| r.id == *id)
    }

    pub(crate) fn get_mut(&mut self, id: &TaskId) -> Option<&mut TaskRecord> {
        self.records.iter_mut().find(|r| r.id == *id)
    }

    /// Prepends an optimistic record.
    pub(crate) fn insert_provisional(&mut self, record: TaskRecord) {
        self.provisional.insert(record.id);
        self.records.insert(0, record);
    }

    /// Prepends `record` unless its id is already shown. Returns whether it
    /// was inserted.
    pub fn insert_if_absent(&mut self, record: TaskRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// Inserts `record` at `index` (clamped to the end) unless its id is
    /// already shown.
    pub(crate) fn insert_at(&mut self, index: usize, record: TaskRecord) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        let index = index.min(self.records.len());
        self.records.insert(index, record);
        true
    }

    /// Replaces the record with the same id in place. Returns `false` if it
    /// is not shown.
    pub fn replace(&mut self, record: TaskRecord) -> bool {
        match self.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                true
            }
            None => false,
        }
    }

    /// Sets the status of a shown record, returning the previous status.
    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> Option<TaskStatus> {
        let record = self.get_mut(id)?;
        Some(std::mem::replace(&mut record.status, status))
    }

    /// Removes a record, returning its former index and the record.
    pub fn remove(&mut self, id: &TaskId) -> Option<(usize, TaskRecord)> {
        let index = self.position(id)?;
        self.provisional.remove(id);
        Some((index, self.records.remove(index)))
    }

    /// Swaps a provisional entry for a broadcast record in place. Returns
    /// `false` if `provisional` is no longer pending or `record` is already
    /// shown.
    pub(crate) fn claim_provisional(&mut self, provisional: &TaskId, record: TaskRecord) -> bool {
        if !self.is_provisional(provisional) || self.contains(&record.id) {
            return false;
        }
        let Some(slot) = self.get_mut(provisional) else {
            return false;
        };
        *slot = record;
        self.provisional.remove(provisional);
        true
    }

    /// Swaps a provisional entry for the authority's record.
    ///
    /// If the `created` broadcast already inserted `record`, the provisional
    /// entry is dropped instead so the task is shown once.
    pub(crate) fn confirm_provisional(&mut self, provisional: &TaskId, record: TaskRecord) {
        if !self.provisional.remove(provisional) {
            self.insert_if_absent(record);
            return;
        }
        if self.contains(&record.id) {
            self.records.retain(|r| r.id != *provisional);
            return;
        }
        match self.get_mut(provisional) {
            Some(slot) => *slot = record,
            None => {
                self.records.insert(0, record);
            }
        }
    }
}
