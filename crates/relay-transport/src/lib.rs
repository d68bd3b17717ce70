//! # relay-transport
//!
//! Connection abstraction layer for the Relay chat server.
//!
//! The relay core never touches sockets directly. It drives values that
//! implement [`Connection`]:
//!
//! - **WebSocket** - an upgraded axum WebSocket (feature `websocket`)
//! - **Memory** - an in-process pair, used by tests and benchmarks
//!
//! ```rust,ignore
//! use tenvis_relay_transport::{Connection, Inbound};
//!
//! async fn echo(conn: &dyn Connection) {
//!     while let Ok(Some(Inbound::Text(text))) = conn.recv().await {
//!         let _ = conn.send_text(&text).await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
