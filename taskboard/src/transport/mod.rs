//! Transport layer between a session and the authority.
//!
//! A [`Transport`] carries one connection's worth of frames. A [`Connector`]
//! opens new connections so the session runtime can reconnect. Concrete
//! implementations:
//! - [`ws::WsConnector`] / [`ws::WsTransport`]: WebSocket over `tokio-tungstenite`
//! - [`loopback::LoopbackConnector`] / [`loopback::LoopbackTransport`]:
//!   in-process channels for tests

pub mod loopback;
pub mod ws;

use std::future::Future;

use taskboard_proto::codec::CodecError;
use taskboard_proto::sync::{ClientFrame, ServerMessage};

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// An underlying I/O or protocol error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One open connection to the authority.
///
/// Messages from the server are delivered by [`recv`](Transport::recv) in
/// the order the server sent them.
pub trait Transport: Send + Sync {
    /// Sends a frame to the server.
    ///
    /// Returns once the frame is handed to the underlying connection, which
    /// says nothing about whether the server processed it.
    fn send(
        &self,
        frame: &ClientFrame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the server.
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection is gone.
    fn recv(&self) -> impl Future<Output = Result<ServerMessage, TransportError>> + Send;

    /// Whether the connection is believed to be open.
    fn is_connected(&self) -> bool;
}

/// Opens connections to the authority.
pub trait Connector: Send + Sync {
    /// The transport produced by a successful connect.
    type Transport: Transport;

    /// Opens a new connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
