//! Bookkeeping for mutations awaiting the authority's answer.

use taskboard_proto::sync::Reply;
use taskboard_proto::task::{TaskChanges, TaskId, TaskRecord, TaskStatus};
use tokio::sync::oneshot;

use super::MutationError;
use super::view::BoardView;

/// Outcome delivered to whoever dispatched a mutation.
pub type MutationResult = Result<Reply, MutationError>;

/// Receives the outcome of one dispatched mutation. Resolves exactly once.
pub type Completion = oneshot::Receiver<MutationResult>;

/// What a mutation did to the view, enough to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorSnapshot {
    /// Nothing to restore beyond dropping the target if it is provisional.
    /// A create's whole effect is its provisional entry.
    None,
    /// Update: the values the patch overwrote, and the patch itself.
    Fields {
        /// Values before the optimistic update.
        inverse: TaskChanges,
        /// Values the optimistic update wrote.
        applied: TaskChanges,
    },
    /// Move: the status before the optimistic move.
    Status {
        /// Status before the move.
        prior: TaskStatus,
        /// Status the move wrote.
        applied: TaskStatus,
    },
    /// Delete: the removed record and where it was shown.
    Record {
        /// The removed record.
        record: TaskRecord,
        /// Its former index in the view.
        index: usize,
    },
}

/// Kind of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Create.
    Create,
    /// Partial update.
    Update,
    /// Status change.
    Move,
    /// Delete.
    Delete,
}

/// A mutation that has been applied optimistically and sent, but not yet
/// confirmed or rejected.
#[derive(Debug)]
pub struct PendingOperation {
    kind: OperationKind,
    target: TaskId,
    prior: PriorSnapshot,
    claimed: Option<TaskId>,
    completion: oneshot::Sender<MutationResult>,
}

impl PendingOperation {
    /// Creates a pending operation and the receiver for its outcome.
    #[must_use]
    pub fn new(kind: OperationKind, target: TaskId, prior: PriorSnapshot) -> (Self, Completion) {
        let (completion, rx) = oneshot::channel();
        (
            Self {
                kind,
                target,
                prior,
                claimed: None,
                completion,
            },
            rx,
        )
    }

    /// Kind of mutation.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Target id. For a create this is the provisional id.
    #[must_use]
    pub const fn target(&self) -> TaskId {
        self.target
    }

    /// For a create, the id of the broadcast record that took over the
    /// provisional entry.
    #[must_use]
    pub const fn claimed(&self) -> Option<TaskId> {
        self.claimed
    }

    /// Records that the `created` broadcast for `id` replaced this create's
    /// provisional entry.
    pub const fn claim(&mut self, id: TaskId) {
        self.claimed = Some(id);
    }

    /// Snapshot taken at dispatch.
    #[must_use]
    pub const fn prior(&self) -> &PriorSnapshot {
        &self.prior
    }

    /// Undoes the optimistic effect in `view`.
    ///
    /// Fields that a broadcast has overwritten since dispatch are left alone,
    /// since the broadcast reflects committed state.
    pub fn revert(&self, view: &mut BoardView) {
        match &self.prior {
            PriorSnapshot::None => {
                if view.is_provisional(&self.target) {
                    view.remove(&self.target);
                }
            }
            PriorSnapshot::Fields { inverse, applied } => {
                if let Some(record) = view.get_mut(&self.target) {
                    still_applied(inverse, applied, record).apply_to(record);
                }
            }
            PriorSnapshot::Status { prior, applied } => {
                if let Some(record) = view.get_mut(&self.target)
                    && record.status == *applied
                {
                    record.status = *prior;
                }
            }
            PriorSnapshot::Record { record, index } => {
                view.insert_at(*index, record.clone());
            }
        }
    }

    /// Drops the snapshot so [`revert`](Self::revert) leaves the view alone.
    /// Used once the target has been deleted by a committed broadcast.
    pub fn forget_prior(&mut self) {
        if self.kind != OperationKind::Create {
            self.prior = PriorSnapshot::None;
        }
    }

    /// Resolves the completion. The dispatcher may have stopped waiting, in
    /// which case the outcome is dropped.
    pub fn resolve(self, result: MutationResult) {
        let _ = self.completion.send(result);
    }
}

/// Narrows `inverse` to the fields whose current value is still the one the
/// optimistic update wrote.
fn still_applied(inverse: &TaskChanges, applied: &TaskChanges, record: &TaskRecord) -> TaskChanges {
    TaskChanges {
        title: inverse
            .title
            .clone()
            .filter(|_| applied.title.as_ref() == Some(&record.title)),
        priority: inverse
            .priority
            .filter(|_| applied.priority == Some(record.priority)),
        category: inverse
            .category
            .filter(|_| applied.category == Some(record.category)),
        status: inverse.status.filter(|_| applied.status == Some(record.status)),
        attachment: inverse
            .attachment
            .clone()
            .filter(|_| applied.attachment.as_ref() == Some(&record.attachment)),
    }
}
