//! WebSocket front end: accepts sessions at `/ws`, feeds their requests to
//! the [`Authority`], and fans confirmed events out through the
//! [`SessionHub`].
//!
//! Each connection gets a writer task draining an unbounded channel and a
//! reader task that handles one request at a time. Replies and broadcasts
//! share the channel, so a session sees the broadcast of its own mutation
//! before the reply to it.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::codec::{self, DEFAULT_MAX_FRAME_SIZE};
use taskboard_proto::sync::{ClientFrame, ServerMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::authority::Authority;
use crate::hub::{SessionHub, SessionId};
use crate::store::{MemoryStore, RecordStore};

/// Shared server state: the authority and the hub it publishes through.
pub struct ServerState<S> {
    authority: Authority<S, Arc<SessionHub>>,
    hub: Arc<SessionHub>,
    max_frame_size: usize,
}

impl<S: RecordStore> ServerState<S> {
    /// Creates state over `store` with the default frame size limit.
    pub fn new(store: S) -> Self {
        Self::with_max_frame_size(store, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates state over `store`, dropping frames larger than `max_frame_size`.
    pub fn with_max_frame_size(store: S, max_frame_size: usize) -> Self {
        let hub = Arc::new(SessionHub::new());
        Self {
            authority: Authority::new(store, Arc::clone(&hub)),
            hub,
            max_frame_size,
        }
    }

    /// The authority handling requests.
    pub const fn authority(&self) -> &Authority<S, Arc<SessionHub>> {
        &self.authority
    }

    /// The session hub.
    pub const fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }
}

/// Serves one upgraded WebSocket until either side closes it.
pub async fn handle_socket<S: RecordStore + 'static>(
    socket: WebSocket,
    state: Arc<ServerState<S>>,
) {
    let session_id = SessionId::new();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Register before reading anything so no broadcast committed after the
    // session's first request can be missed.
    state.hub.register(session_id, tx.clone()).await;
    tracing::info!(session_id = %session_id, "session connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(session_id = %session_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(session_id, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %session_id, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.hub.unregister(&session_id).await;
    tracing::info!(session_id = %session_id, "session disconnected");
}

/// Decodes one frame, runs it through the authority, and queues the reply
/// for this session only. Undecodable or oversized frames are dropped.
async fn handle_frame<S: RecordStore + 'static>(
    session_id: SessionId,
    data: &[u8],
    state: &Arc<ServerState<S>>,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let ClientFrame {
        request_id,
        request,
    } = match codec::decode_client_frame(data, state.max_frame_size) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "dropping unreadable frame");
            return;
        }
    };

    let op = request.name();
    tracing::debug!(session_id = %session_id, request_id = %request_id, op, "handling request");

    // Detached from the reader: closing the session must not cancel a commit
    // between its store write and its broadcast.
    let task_state = Arc::clone(state);
    let outcome = tokio::spawn(async move { task_state.authority.handle(request).await }).await;
    let result = match outcome {
        Ok(result) => result.map_err(|e| {
            tracing::warn!(
                session_id = %session_id,
                request_id = %request_id,
                op,
                error = %e,
                "request rejected"
            );
            e.to_request_error()
        }),
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                request_id = %request_id,
                op,
                error = %e,
                "request task failed"
            );
            return;
        }
    };

    match codec::encode(&ServerMessage::Reply { request_id, result }) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "failed to encode reply");
        }
    }
}

/// Starts an in-memory server on `addr` and returns the bound address and a
/// join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    start_server_with_state(addr, Arc::new(ServerState::new(MemoryStore::new()))).await
}

/// Starts the server over a pre-built [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: RecordStore + 'static>(
    addr: &str,
    state: Arc<ServerState<S>>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "task board server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn ws_handler<S: RecordStore + 'static>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState<S>>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
