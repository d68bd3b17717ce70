//! Instrumentation hooks.
//!
//! The core reports what happens to sessions and broadcasts through a
//! [`RelayObserver`]; the server plugs its metrics in here. Every hook has an
//! empty default so implementors only override what they record.

use crate::broadcast::BroadcastReport;
use crate::registry::ChannelId;
use relay_protocol::ErrorCode;
use std::time::Duration;
use tenvis_relay_transport::ConnectionId;

/// Receives relay events. Hooks run inline and must not block.
pub trait RelayObserver: Send + Sync {
    /// A channel was created by `create`.
    fn channel_created(&self, _channel: ChannelId) {}

    /// A connection joined an existing channel.
    fn member_joined(&self, _channel: ChannelId) {}

    /// A session left its channel.
    fn member_left(&self, _channel: ChannelId) {}

    /// A session was refused with an error line.
    fn session_rejected(&self, _code: ErrorCode) {}

    /// A chat message of `bytes` length was fanned out.
    fn message_relayed(&self, _bytes: usize, _report: &BroadcastReport, _elapsed: Duration) {}

    /// A recipient was evicted after a failed send.
    fn send_failed(&self, _recipient: &ConnectionId) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RelayObserver for NoopObserver {}
