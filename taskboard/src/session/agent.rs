//! The client session agent.
//!
//! One [`SessionAgent`] exists per connection to the authority. It owns the
//! session's [`BoardView`], applies local mutations optimistically, and
//! reconciles the view as replies and broadcasts arrive. It never performs
//! I/O: [`crate::net`] feeds it decoded messages one at a time and sends the
//! frames it returns.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use taskboard_proto::sync::{
    BoardEvent, ClientFrame, Reply, Request, RequestError, RequestId, ServerMessage,
};
use taskboard_proto::task::{NewTask, TaskChanges, TaskId, TaskRecord, TaskStatus};

use super::pending::{Completion, OperationKind, PendingOperation, PriorSnapshot};
use super::view::BoardView;
use super::{MutationError, SessionError, SessionState};

/// A local change to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a task.
    Create(NewTask),
    /// Overwrite some fields of a task.
    Update {
        /// Target task.
        id: TaskId,
        /// Fields to overwrite.
        changes: TaskChanges,
    },
    /// Move a task to another column.
    Move {
        /// Target task.
        id: TaskId,
        /// New column.
        status: TaskStatus,
    },
    /// Delete a task.
    Delete {
        /// Target task.
        id: TaskId,
    },
}

/// A mutation that has been applied locally and must now be sent.
#[derive(Debug)]
pub struct Dispatched {
    /// Frame to send to the authority.
    pub frame: ClientFrame,
    /// Resolves with the authority's answer, or a disconnect error.
    pub completion: Completion,
}

/// What handling one server message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The message was not relevant in the current state.
    Ignored,
    /// The snapshot was applied and the session is live.
    Synchronized {
        /// Number of records in the snapshot.
        count: usize,
    },
    /// The snapshot request failed; the connection should be retried.
    SyncFailed(String),
    /// A broadcast was processed.
    Broadcast {
        /// The event.
        event: BoardEvent,
        /// Whether the view changed.
        changed: bool,
    },
    /// The authority reported a failure not tied to this session.
    Advisory(String),
    /// A pending mutation was confirmed.
    Confirmed {
        /// Request that was confirmed.
        request_id: RequestId,
        /// Kind of mutation.
        kind: OperationKind,
    },
    /// A pending mutation was rejected and its effect undone.
    Reverted {
        /// Request that was rejected.
        request_id: RequestId,
        /// Kind of mutation.
        kind: OperationKind,
        /// The authority's reason.
        error: RequestError,
    },
}

/// Per-session view state machine.
#[derive(Debug, Default)]
pub struct SessionAgent {
    state: SessionState,
    view: BoardView,
    pending: HashMap<RequestId, PendingOperation>,
    next_request_id: u64,
    sync_request: Option<RequestId>,
    /// Ids deleted while a create was pending. A late create reply for one
    /// of these must not put it back.
    removed_during_create: HashSet<TaskId>,
}

impl SessionAgent {
    /// Creates a disconnected agent with an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The materialized view.
    #[must_use]
    pub const fn view(&self) -> &BoardView {
        &self.view
    }

    /// Number of mutations awaiting an answer.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// `Disconnected → Connecting`.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless disconnected.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::Disconnected)?;
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// `Connecting → Synchronizing`. Returns the snapshot request to send.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless connecting.
    pub fn connected(&mut self) -> Result<ClientFrame, SessionError> {
        self.require(SessionState::Connecting)?;
        let request_id = self.next_request_id();
        self.sync_request = Some(request_id);
        self.state = SessionState::Synchronizing;
        tracing::debug!(request_id = %request_id, "requesting snapshot");
        Ok(ClientFrame {
            request_id,
            request: Request::ListAll,
        })
    }

    /// Any state `→ Disconnected`.
    ///
    /// Pending mutations are dropped without reverting and their completions
    /// resolve with [`MutationError::Disconnected`]. The view is left as is
    /// until the next snapshot replaces it.
    pub fn disconnected(&mut self) {
        if !self.pending.is_empty() {
            tracing::info!(count = self.pending.len(), "dropping pending mutations on disconnect");
        }
        for (_, op) in self.pending.drain() {
            op.resolve(Err(MutationError::Disconnected));
        }
        self.sync_request = None;
        self.removed_during_create.clear();
        self.state = SessionState::Disconnected;
    }

    /// Applies `mutation` optimistically and records it as pending.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] unless live, [`SessionError::NotFound`]
    /// if the target is not a confirmed record in the view. Neither changes
    /// anything.
    pub fn dispatch(&mut self, mutation: Mutation) -> Result<Dispatched, SessionError> {
        self.require(SessionState::Live)?;

        let (kind, target, prior, request) = match mutation {
            Mutation::Create(task) => {
                let request = Request::Create(task.to_draft());
                let record = TaskRecord::from_new(TaskId::new(), task, now_ms());
                let target = record.id;
                self.view.insert_provisional(record);
                (OperationKind::Create, target, PriorSnapshot::None, request)
            }
            Mutation::Update { id, changes } => {
                let record = self.confirmed_mut(id)?;
                let inverse = changes.inverse_for(record);
                changes.apply_to(record);
                let request = Request::Update {
                    id,
                    patch: changes.to_patch(),
                };
                let prior = PriorSnapshot::Fields {
                    inverse,
                    applied: changes,
                };
                (OperationKind::Update, id, prior, request)
            }
            Mutation::Move { id, status } => {
                let record = self.confirmed_mut(id)?;
                let prior = std::mem::replace(&mut record.status, status);
                let request = Request::Move {
                    id,
                    status: status.as_str().to_string(),
                };
                let prior = PriorSnapshot::Status {
                    prior,
                    applied: status,
                };
                (OperationKind::Move, id, prior, request)
            }
            Mutation::Delete { id } => {
                self.confirmed_mut(id)?;
                let Some((index, record)) = self.view.remove(&id) else {
                    return Err(SessionError::NotFound(id));
                };
                self.note_removed(id);
                let prior = PriorSnapshot::Record { record, index };
                (OperationKind::Delete, id, prior, Request::Delete { id })
            }
        };

        let request_id = self.next_request_id();
        let (op, completion) = PendingOperation::new(kind, target, prior);
        self.pending.insert(request_id, op);
        tracing::debug!(
            request_id = %request_id,
            task_id = %target,
            op = request.name(),
            "mutation dispatched"
        );

        Ok(Dispatched {
            frame: ClientFrame {
                request_id,
                request,
            },
            completion,
        })
    }

    /// Processes one message from the authority.
    pub fn handle_message(&mut self, message: ServerMessage) -> AgentEvent {
        match (self.state, message) {
            (SessionState::Synchronizing, ServerMessage::Reply { request_id, result })
                if Some(request_id) == self.sync_request =>
            {
                self.sync_request = None;
                self.apply_snapshot(result)
            }
            (SessionState::Live, ServerMessage::Reply { request_id, result }) => {
                self.handle_reply(request_id, result)
            }
            (SessionState::Live, ServerMessage::Event(event)) => self.apply_event(event),
            (state, message) => {
                tracing::trace!(%state, ?message, "ignoring message");
                AgentEvent::Ignored
            }
        }
    }

    fn apply_snapshot(&mut self, result: Result<Reply, RequestError>) -> AgentEvent {
        match result {
            Ok(Reply::Tasks(records)) => {
                let count = records.len();
                self.view.replace_all(records);
                self.removed_during_create.clear();
                self.state = SessionState::Live;
                tracing::info!(count, "snapshot applied, session live");
                AgentEvent::Synchronized { count }
            }
            Ok(other) => {
                tracing::warn!(reply = ?other, "unexpected reply to snapshot request");
                AgentEvent::SyncFailed("unexpected reply to snapshot request".to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "snapshot request failed");
                AgentEvent::SyncFailed(e.to_string())
            }
        }
    }

    fn handle_reply(
        &mut self,
        request_id: RequestId,
        result: Result<Reply, RequestError>,
    ) -> AgentEvent {
        let Some(op) = self.pending.remove(&request_id) else {
            tracing::debug!(request_id = %request_id, "reply for unknown request");
            return AgentEvent::Ignored;
        };
        let event = self.settle(request_id, op, result);
        if !self.creates_pending() {
            self.removed_during_create.clear();
        }
        event
    }

    fn settle(
        &mut self,
        request_id: RequestId,
        op: PendingOperation,
        result: Result<Reply, RequestError>,
    ) -> AgentEvent {
        let kind = op.kind();
        match result {
            Ok(reply) => {
                if kind == OperationKind::Create {
                    let Reply::Task(record) = &reply else {
                        op.revert(&mut self.view);
                        op.resolve(Err(MutationError::UnexpectedReply));
                        return AgentEvent::Ignored;
                    };
                    self.confirm_create(&op, record.clone());
                }
                tracing::debug!(request_id = %request_id, "mutation confirmed");
                op.resolve(Ok(reply));
                AgentEvent::Confirmed { request_id, kind }
            }
            Err(error) => {
                tracing::info!(
                    request_id = %request_id,
                    error = %error,
                    "mutation rejected, reverting"
                );
                op.revert(&mut self.view);
                op.resolve(Err(MutationError::Rejected(error.clone())));
                AgentEvent::Reverted {
                    request_id,
                    kind,
                    error,
                }
            }
        }
    }

    fn apply_event(&mut self, event: BoardEvent) -> AgentEvent {
        let changed = match &event {
            BoardEvent::Created(record) => self.insert_created(record),
            BoardEvent::Updated(record) => self.view.replace(record.clone()),
            BoardEvent::Moved { id, status } => self
                .view
                .set_status(id, *status)
                .is_some_and(|prior| prior != *status),
            BoardEvent::Deleted { id } => {
                // A committed delete must not be undone by reverting one of
                // our own mutations on the same record.
                for op in self.pending.values_mut().filter(|op| op.target() == *id) {
                    op.forget_prior();
                }
                self.note_removed(*id);
                self.view.remove(id).is_some()
            }
            BoardEvent::Error { message } => {
                tracing::warn!(message = %message, "server advisory");
                return AgentEvent::Advisory(message.clone());
            }
        };
        AgentEvent::Broadcast { event, changed }
    }

    /// Inserts a broadcast record. If it is the outcome of one of our pending
    /// creates, it takes over that create's provisional entry so the task is
    /// never shown twice.
    fn insert_created(&mut self, record: &TaskRecord) -> bool {
        if self.view.contains(&record.id) {
            return false;
        }
        let claimant = self
            .pending
            .iter()
            .filter(|(_, op)| op.kind() == OperationKind::Create && op.claimed().is_none())
            .filter(|(_, op)| {
                self.view
                    .get(&op.target())
                    .is_some_and(|provisional| same_content(provisional, record))
            })
            .min_by_key(|(request_id, _)| **request_id)
            .map(|(request_id, _)| *request_id);
        if let Some(op) = claimant.and_then(|request_id| self.pending.get_mut(&request_id))
            && self.view.claim_provisional(&op.target(), record.clone())
        {
            op.claim(record.id);
            return true;
        }
        self.view.insert_if_absent(record.clone())
    }

    /// Binds a confirmed create to the authority's record.
    fn confirm_create(&mut self, op: &PendingOperation, record: TaskRecord) {
        let target = op.target();
        match op.claimed() {
            // Its own broadcast already took over the provisional entry.
            Some(claimed) if claimed == record.id => {}
            _ if self.removed_during_create.contains(&record.id) => {
                if self.view.is_provisional(&target) {
                    self.view.remove(&target);
                }
            }
            // An identical create from elsewhere took the provisional entry.
            Some(_) => {
                self.view.insert_if_absent(record);
            }
            None => self.view.confirm_provisional(&target, record),
        }
    }

    fn creates_pending(&self) -> bool {
        self.pending
            .values()
            .any(|op| op.kind() == OperationKind::Create)
    }

    fn note_removed(&mut self, id: TaskId) {
        if self.creates_pending() {
            self.removed_during_create.insert(id);
        }
    }

    /// Returns the record `id` if it is shown and not provisional.
    fn confirmed_mut(&mut self, id: TaskId) -> Result<&mut TaskRecord, SessionError> {
        if self.view.is_provisional(&id) {
            return Err(SessionError::NotFound(id));
        }
        self.view.get_mut(&id).ok_or(SessionError::NotFound(id))
    }

    fn require(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

/// Whether two records carry the same user-visible fields.
fn same_content(a: &TaskRecord, b: &TaskRecord) -> bool {
    a.title == b.title
        && a.priority == b.priority
        && a.category == b.category
        && a.status == b.status
        && a.attachment == b.attachment
}

/// Local clock for provisional records, replaced by the authority's record.
fn now_ms() -> u64 {
    u64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}
