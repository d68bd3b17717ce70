//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`] in the [`Connection`] trait. The
//! socket is split so that the owning session can block in `recv` while
//! other sessions write broadcasts to it; writes share one lock on the sink.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, Inbound, TransportError};

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    remote_addr: Option<SocketAddr>,
    closed: watch::Sender<bool>,
}

impl WebSocketConnection {
    /// Wrap an upgraded WebSocket.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        let (sink, stream) = socket.split();
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::generate(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            remote_addr,
            closed,
        }
    }

    fn mark_closed(&self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&self) -> Result<Option<Inbound>, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut stream = self.stream.lock().await;

        let next = tokio::select! {
            biased;

            _ = async { closed.wait_for(|closed| *closed).await.is_ok() } => return Ok(None),

            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => Ok(Some(Inbound::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Inbound::Binary(Bytes::from(data)))),
            // tungstenite queues the pong reply for pings itself
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(Some(Inbound::Control)),
            Some(Ok(Message::Close(_))) => {
                debug!(connection = %self.id, "Received close frame");
                self.mark_closed();
                Ok(None)
            }
            Some(Err(e)) => {
                warn!(connection = %self.id, error = %e, "WebSocket error");
                self.mark_closed();
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
            None => {
                debug!(connection = %self.id, "WebSocket stream ended");
                self.mark_closed();
                Ok(None)
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.to_owned())).await.map_err(|e| {
            self.mark_closed();
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(()); // Already closed
        }

        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}
