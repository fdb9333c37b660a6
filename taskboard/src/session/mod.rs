//! Client session: the materialized board view and the state machine that
//! keeps it in step with the authority.
//!
//! [`agent::SessionAgent`] is transport-agnostic. It consumes decoded
//! [`ServerMessage`](taskboard_proto::sync::ServerMessage)s and produces
//! [`ClientFrame`](taskboard_proto::sync::ClientFrame)s; the network runtime
//! in [`crate::net`] moves those over a connection.

pub mod agent;
pub mod board;
pub mod pending;
pub mod view;

use std::fmt;

use taskboard_proto::sync::RequestError;
use taskboard_proto::task::TaskId;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No connection. Initial state.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and waiting for the snapshot.
    Synchronizing,
    /// Snapshot applied; mutations and broadcasts are processed.
    Live,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Synchronizing => write!(f, "synchronizing"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Errors raised locally by the session before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The operation is not allowed in the current state.
    #[error("session is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires.
        expected: SessionState,
        /// State the session is in.
        actual: SessionState,
    },

    /// The target id is not in the local view.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The session runtime has shut down.
    #[error("session closed")]
    Closed,
}

/// Failure outcome of a dispatched mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// The session refused the mutation; nothing was applied or sent.
    #[error(transparent)]
    Refused(#[from] SessionError),

    /// The authority rejected the mutation; its optimistic effect was reverted.
    #[error("rejected by server: {0}")]
    Rejected(#[from] RequestError),

    /// The connection dropped before an outcome arrived. The next snapshot
    /// decides whether the mutation took effect.
    #[error("disconnected before the server answered")]
    Disconnected,

    /// The authority answered with a reply of the wrong shape.
    #[error("unexpected reply from server")]
    UnexpectedReply,
}
