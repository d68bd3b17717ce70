//! # relay-core
//!
//! Channel registry, broadcast engine and session handling for the Relay
//! chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **KeyGenerator** - Short invite keys for channels
//! - **ChannelRegistry** - The single source of truth for channel membership
//! - **Broadcaster** - Best-effort fan-out of a message to the other members
//! - **SessionHandler** - Per-connection state machine
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Connection │────▶│ SessionHandler  │────▶│ Broadcaster │
//! └─────────────┘     └─────────────────┘     └─────────────┘
//!                              │                      │
//!                              ▼                      ▼
//!                     ┌─────────────────────────────────────┐
//!                     │           ChannelRegistry           │
//!                     └─────────────────────────────────────┘
//! ```

pub mod broadcast;
pub mod keygen;
pub mod observer;
pub mod registry;
pub mod session;

pub use broadcast::{BroadcastConfig, BroadcastReport, Broadcaster};
pub use keygen::{KeyGenerator, RandomKeyGenerator};
pub use observer::{NoopObserver, RelayObserver};
pub use registry::{ChannelId, ChannelRegistry, RegistryConfig, RegistryError, RegistryStats};
pub use session::{SessionError, SessionHandler, SessionOutcome, SessionState};
