//! Loopback transport for testing.
//!
//! [`LoopbackConnector`] hands out [`LoopbackTransport`]s that a test has
//! prepared through a [`LoopbackListener`]. The test keeps the matching
//! [`LoopbackPeer`] and plays the server: it reads the client's frames and
//! writes whatever [`ServerMessage`]s it likes. Dropping the peer closes the
//! connection.

use tokio::sync::{Mutex, mpsc};

use taskboard_proto::sync::{ClientFrame, ServerMessage};

use super::{Connector, Transport, TransportError};

/// Client end of an in-process connection.
pub struct LoopbackTransport {
    tx: mpsc::Sender<ClientFrame>,
    rx: Mutex<mpsc::Receiver<ServerMessage>>,
}

/// Server end of an in-process connection.
pub struct LoopbackPeer {
    tx: mpsc::Sender<ServerMessage>,
    rx: mpsc::Receiver<ClientFrame>,
}

impl LoopbackPeer {
    /// Receives the next frame the client sent, or `None` once the client
    /// end is dropped.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.rx.recv().await
    }

    /// Sends a message to the client.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionClosed`] if the client end is gone.
    pub async fn send(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Creates a connected client/server pair with `buffer` slots per direction.
#[must_use]
pub fn pair(buffer: usize) -> (LoopbackTransport, LoopbackPeer) {
    let (client_tx, server_rx) = mpsc::channel(buffer);
    let (server_tx, client_rx) = mpsc::channel(buffer);
    (
        LoopbackTransport {
            tx: client_tx,
            rx: Mutex::new(client_rx),
        },
        LoopbackPeer {
            tx: server_tx,
            rx: server_rx,
        },
    )
}

impl Transport for LoopbackTransport {
    async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<ServerMessage, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Queue of prepared connections, fed by a [`LoopbackListener`].
///
/// `connect` takes the next prepared transport, or fails with
/// [`TransportError::Unreachable`] when none is queued.
pub struct LoopbackConnector {
    queued: Mutex<mpsc::UnboundedReceiver<LoopbackTransport>>,
}

/// Prepares connections for a [`LoopbackConnector`].
#[derive(Clone)]
pub struct LoopbackListener {
    tx: mpsc::UnboundedSender<LoopbackTransport>,
    buffer: usize,
}

impl LoopbackConnector {
    /// Creates a connector and the listener that feeds it.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, LoopbackListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                queued: Mutex::new(rx),
            },
            LoopbackListener { tx, buffer },
        )
    }
}

impl LoopbackListener {
    /// Queues one connection and returns its server end.
    #[must_use]
    pub fn prepare(&self) -> LoopbackPeer {
        let (transport, peer) = pair(self.buffer);
        let _ = self.tx.send(transport);
        peer
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self) -> Result<LoopbackTransport, TransportError> {
        self.queued
            .lock()
            .await
            .try_recv()
            .map_err(|_| TransportError::Unreachable("loopback".to_string()))
    }
}
