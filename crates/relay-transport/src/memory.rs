//! In-memory connections.
//!
//! A [`pair`] links a server-side [`MemoryConnection`] to a [`MemoryClient`]
//! through unbounded channels. Sessions driven over a pair behave exactly as
//! they would over a socket, which makes them the workhorse of the relay's
//! tests and benchmarks.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::trace;

use crate::traits::{Connection, ConnectionId, Inbound, TransportError};

/// Create a connected server/client pair with a generated ID.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryClient) {
    pair_with_id(ConnectionId::generate())
}

/// Create a connected server/client pair with the given ID.
#[must_use]
pub fn pair_with_id(id: impl Into<ConnectionId>) -> (MemoryConnection, MemoryClient) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (closed, _) = watch::channel(false);

    let conn = MemoryConnection {
        id: id.into(),
        inbound: Mutex::new(inbound_rx),
        outbound: outbound_tx,
        closed,
    };
    let client = MemoryClient {
        tx: inbound_tx,
        rx: outbound_rx,
    };
    (conn, client)
}

/// Server side of an in-memory pair.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&self) -> Result<Option<Inbound>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;

        tokio::select! {
            biased;

            _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => Ok(None),

            frame = inbound.recv() => match frame {
                Some(frame) => Ok(Some(frame)),
                None => {
                    trace!(connection = %self.id, "Memory client hung up");
                    self.closed.send_replace(true);
                    Ok(None)
                }
            },
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound.send(text.to_owned()).map_err(|_| {
            self.closed.send_replace(true);
            TransportError::SendFailed("memory client dropped".into())
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// Client side of an in-memory pair.
///
/// Dropping the client closes the connection in both directions.
#[derive(Debug)]
pub struct MemoryClient {
    tx: mpsc::UnboundedSender<Inbound>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryClient {
    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Inbound::Text(text.into()))
    }

    /// Send a binary frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send(Inbound::Binary(data.into()))
    }

    /// Send a control frame (ping) to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side has been dropped.
    pub fn send_control(&self) -> Result<(), TransportError> {
        self.send(Inbound::Control)
    }

    fn send(&self, frame: Inbound) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next text frame from the server.
    ///
    /// Returns `None` once the server side is gone and all frames are drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Receive a text frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Stop reading: every later server-side send fails, while this client
    /// can still send.
    pub fn close_reader(&mut self) {
        self.rx.close();
    }
}
