//! Broadcast fan-out from the authority to connected sessions.
//!
//! The authority only sees the [`Publisher`] capability. [`SessionHub`] is the
//! production implementation: a registry of per-session outbound channels,
//! each drained by that session's WebSocket writer task, which gives FIFO
//! delivery per connection.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::Message;
use taskboard_proto::codec;
use taskboard_proto::sync::{BoardEvent, ServerMessage};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Capability to deliver a confirmed event to every connected session.
pub trait Publisher: Send + Sync {
    /// Delivers `event` to all sessions connected at the time of the call,
    /// the originator included.
    fn publish(&self, event: BoardEvent) -> impl Future<Output = ()> + Send;
}

impl<P: Publisher> Publisher for Arc<P> {
    fn publish(&self, event: BoardEvent) -> impl Future<Output = ()> + Send {
        (**self).publish(event)
    }
}

/// Server-assigned identity of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of connected sessions.
#[derive(Default)]
pub struct SessionHub {
    /// Maps each session to the sender feeding its WebSocket writer task.
    sessions: RwLock<HashMap<SessionId, mpsc::UnboundedSender<Message>>>,
}

impl SessionHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session's outbound channel.
    pub async fn register(&self, session_id: SessionId, sender: mpsc::UnboundedSender<Message>) {
        self.sessions.write().await.insert(session_id, sender);
    }

    /// Removes a session, returning its sender if it was registered.
    pub async fn unregister(
        &self,
        session_id: &SessionId,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Number of sessions currently registered.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sends a WebSocket Close frame to every session.
    ///
    /// Each writer task forwards the close frame and the client detects the
    /// disconnect. Used for graceful shutdown and to exercise client resync.
    pub async fn close_all(&self) {
        let sessions = self.sessions.read().await;
        for (session_id, sender) in sessions.iter() {
            tracing::info!(session_id = %session_id, "sending close frame to session");
            let _ = sender.send(Message::Close(None));
        }
    }
}

impl Publisher for SessionHub {
    async fn publish(&self, event: BoardEvent) {
        let bytes = match codec::encode(&ServerMessage::Event(event)) {
            Ok(bytes) => axum::body::Bytes::from(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode broadcast event");
                return;
            }
        };

        let mut closed = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (session_id, sender) in sessions.iter() {
                if sender.send(Message::Binary(bytes.clone())).is_err() {
                    closed.push(*session_id);
                }
            }
            tracing::debug!(sessions = sessions.len(), "broadcast event published");
        }

        // Writer task already gone; the reader side will clean up too, this
        // just stops further sends into a dead channel.
        if !closed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for session_id in &closed {
                tracing::warn!(session_id = %session_id, "dropping session with closed channel");
                sessions.remove(session_id);
            }
        }
    }
}
