//! Synchronization protocol messages exchanged between session agents and the
//! authority.
//!
//! Clients send [`ClientFrame`]s carrying a [`Request`] tagged with a
//! per-connection [`RequestId`]. The authority answers each frame with exactly
//! one [`ServerMessage::Reply`] to the issuer, and publishes a
//! [`ServerMessage::Event`] to every connected session when state changed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{TaskDraft, TaskId, TaskPatch, TaskRecord, TaskStatus};

/// Correlation handle linking a request to its reply.
///
/// Allocated by the client, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations a client can ask the authority to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Fetch every record. Sent once per connection while synchronizing.
    ListAll,
    /// Create a record from the given fields.
    Create(TaskDraft),
    /// Replace the fields present in `patch`.
    Update {
        /// Target record.
        id: TaskId,
        /// Fields to replace.
        patch: TaskPatch,
    },
    /// Change only the status. The status is an unparsed name so that the
    /// authority can reject values outside the three columns.
    Move {
        /// Target record.
        id: TaskId,
        /// New status name.
        status: String,
    },
    /// Remove a record.
    Delete {
        /// Target record.
        id: TaskId,
    },
}

impl Request {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListAll => "list_all",
            Self::Create(_) => "create",
            Self::Update { .. } => "update",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A request tagged with its correlation handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Echoed back in the matching reply.
    pub request_id: RequestId,
    /// The operation.
    pub request: Request,
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Full list for [`Request::ListAll`], in creation order.
    Tasks(Vec<TaskRecord>),
    /// The stored record after a create or update.
    Task(TaskRecord),
    /// Status change applied.
    Moved {
        /// Target record.
        id: TaskId,
        /// Status now stored.
        status: TaskStatus,
    },
    /// The removed record, or `None` if it was already gone.
    Deleted(Option<TaskRecord>),
}

/// Failure category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: empty title, unknown enum name.
    Validation,
    /// The target id does not exist.
    NotFound,
    /// The record store failed.
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation error"),
            Self::NotFound => write!(f, "not found"),
            Self::Store => write!(f, "store error"),
        }
    }
}

/// A request failure reported to the issuing session only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RequestError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl RequestError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A confirmed state change, delivered to every connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardEvent {
    /// A record was created.
    Created(TaskRecord),
    /// A record was updated; carries the full merged record.
    Updated(TaskRecord),
    /// Only the status changed.
    Moved {
        /// Target record.
        id: TaskId,
        /// New status.
        status: TaskStatus,
    },
    /// A record was removed.
    Deleted {
        /// Removed record's id.
        id: TaskId,
    },
    /// Advisory notice that some operation failed server-side. Carries no
    /// session identity and no state change.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl BoardEvent {
    /// Id of the record this event concerns, if any.
    #[must_use]
    pub const fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Created(record) | Self::Updated(record) => Some(&record.id),
            Self::Moved { id, .. } | Self::Deleted { id } => Some(id),
            Self::Error { .. } => None,
        }
    }
}

/// Messages sent from the authority to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Outcome of one [`ClientFrame`], sent to its issuer only.
    Reply {
        /// Correlation handle from the frame.
        request_id: RequestId,
        /// Outcome.
        result: Result<Reply, RequestError>,
    },
    /// Broadcast state change.
    Event(BoardEvent),
}
