//! Message fan-out.
//!
//! A broadcast delivers one chat message to every other member of the
//! sender's channel. Delivery is at-most-once: no acknowledgement, no retry,
//! no buffering. A recipient whose send fails is evicted from the channel
//! and closed, and the remaining recipients are unaffected.

use crate::observer::{NoopObserver, RelayObserver};
use crate::registry::{ChannelId, ChannelRegistry};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tenvis_relay_transport::{Connection, ConnectionId, TransportError};
use tokio::time::timeout;
use tracing::{trace, warn};

/// Broadcaster configuration.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Longest a single recipient may take to accept a message.
    pub send_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that accepted the message.
    pub delivered: usize,
    /// Recipients evicted because the send failed.
    pub failed: usize,
}

/// Fans messages out to channel members.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ChannelRegistry>,
    observer: Arc<dyn RelayObserver>,
    config: BroadcastConfig,
}

impl Broadcaster {
    /// Create a broadcaster with default configuration.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self::with_config(registry, BroadcastConfig::default())
    }

    /// Create a broadcaster with custom configuration.
    #[must_use]
    pub fn with_config(registry: Arc<ChannelRegistry>, config: BroadcastConfig) -> Self {
        Self {
            registry,
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    /// Report send failures to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RelayObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Deliver `payload` to every open member of `channel_id` except `sender`.
    ///
    /// Sends run concurrently. The call returns once every recipient has
    /// accepted the message, failed, or timed out, so consecutive broadcasts
    /// from one sender reach each recipient in order.
    pub async fn broadcast(
        &self,
        channel_id: ChannelId,
        sender: &ConnectionId,
        payload: &str,
    ) -> BroadcastReport {
        let recipients: Vec<Arc<dyn Connection>> = self
            .registry
            .members(channel_id)
            .into_iter()
            .filter(|member| member.id() != sender && member.is_open())
            .collect();

        if recipients.is_empty() {
            trace!(channel = %channel_id, "No recipients");
            return BroadcastReport::default();
        }

        let results = join_all(
            recipients
                .iter()
                .map(|member| self.deliver(member.as_ref(), payload)),
        )
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (member, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        channel = %channel_id,
                        recipient = %member.id(),
                        error = %e,
                        "Send failed, evicting recipient"
                    );
                    failed.push(member);
                }
            }
        }
        report.failed = failed.len();

        join_all(failed.into_iter().map(|member| self.evict(channel_id, member.as_ref()))).await;

        trace!(
            channel = %channel_id,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }

    async fn deliver(&self, member: &dyn Connection, payload: &str) -> Result<(), TransportError> {
        match timeout(self.config.send_timeout, member.send_text(payload)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn evict(&self, channel_id: ChannelId, member: &dyn Connection) {
        self.registry.remove_member(channel_id, member.id());
        self.observer.send_failed(member.id());

        // Closing wakes the member's own session so it can exit.
        match timeout(self.config.send_timeout, member.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(recipient = %member.id(), error = %e, "Close failed"),
            Err(_) => trace!(recipient = %member.id(), "Close timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tenvis_relay_transport::memory::{self, MemoryClient};
    use tenvis_relay_transport::Inbound;

    fn join_new(
        registry: &ChannelRegistry,
        channel: ChannelId,
        id: &str,
    ) -> (Arc<dyn Connection>, MemoryClient) {
        let (conn, client) = memory::pair_with_id(id);
        let conn: Arc<dyn Connection> = Arc::new(conn);
        registry.add_member(channel, conn.clone()).unwrap();
        (conn, client)
    }

    /// A connection whose sends never complete.
    struct StalledConnection {
        id: ConnectionId,
    }

    #[async_trait]
    impl Connection for StalledConnection {
        fn id(&self) -> &ConnectionId {
            &self.id
        }

        async fn recv(&self) -> Result<Option<Inbound>, TransportError> {
            std::future::pending().await
        }

        async fn send_text(&self, _text: &str) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (channel, _) = registry.create_channel().unwrap();

        let (a, mut a_client) = join_new(&registry, channel, "a");
        let (_b, mut b_client) = join_new(&registry, channel, "b");
        let (_c, mut c_client) = join_new(&registry, channel, "c");

        let report = broadcaster.broadcast(channel, a.id(), "hello").await;
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });

        assert_eq!(b_client.try_recv().as_deref(), Some("hello"));
        assert_eq!(c_client.try_recv().as_deref(), Some("hello"));
        assert_eq!(a_client.try_recv(), None);
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_channel() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (first, _) = registry.create_channel().unwrap();
        let (second, _) = registry.create_channel().unwrap();

        let (a, _a_client) = join_new(&registry, first, "a");
        let (_b, mut b_client) = join_new(&registry, first, "b");
        let (_x, mut x_client) = join_new(&registry, second, "x");

        broadcaster.broadcast(first, a.id(), "for first").await;

        assert_eq!(b_client.try_recv().as_deref(), Some("for first"));
        assert_eq!(x_client.try_recv(), None);
    }

    #[tokio::test]
    async fn test_failed_recipient_is_evicted() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (channel, _) = registry.create_channel().unwrap();

        let (a, _a_client) = join_new(&registry, channel, "a");
        let (gone, mut gone_client) = join_new(&registry, channel, "gone");
        let (_c, mut c_client) = join_new(&registry, channel, "c");
        gone_client.close_reader();

        let report = broadcaster.broadcast(channel, a.id(), "still here").await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(c_client.try_recv().as_deref(), Some("still here"));

        assert_eq!(registry.member_count(channel), 2);
        assert_eq!(registry.channel_of(gone.id()), None);
        assert!(!gone.is_open());
    }

    #[tokio::test]
    async fn test_closed_members_are_skipped() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (channel, _) = registry.create_channel().unwrap();

        let (a, _a_client) = join_new(&registry, channel, "a");
        let (b, _b_client) = join_new(&registry, channel, "b");
        b.close().await.unwrap();

        let report = broadcaster.broadcast(channel, a.id(), "anyone?").await;
        assert_eq!(report, BroadcastReport::default());
        // Closed members leave through their own session, not the broadcast.
        assert_eq!(registry.member_count(channel), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_recipient_times_out() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::with_config(
            registry.clone(),
            BroadcastConfig {
                send_timeout: Duration::from_millis(100),
            },
        );
        let (channel, _) = registry.create_channel().unwrap();

        let (a, _a_client) = join_new(&registry, channel, "a");
        let (_b, mut b_client) = join_new(&registry, channel, "b");
        let stalled: Arc<dyn Connection> = Arc::new(StalledConnection {
            id: "stalled".into(),
        });
        registry.add_member(channel, stalled.clone()).unwrap();

        let report = broadcaster.broadcast(channel, a.id(), "tick").await;
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(b_client.try_recv().as_deref(), Some("tick"));
        assert_eq!(registry.channel_of(stalled.id()), None);
    }

    #[tokio::test]
    async fn test_per_recipient_order() {
        let registry = Arc::new(ChannelRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (channel, _) = registry.create_channel().unwrap();

        let (a, _a_client) = join_new(&registry, channel, "a");
        let (_b, mut b_client) = join_new(&registry, channel, "b");

        for i in 0..50 {
            broadcaster.broadcast(channel, a.id(), &format!("msg-{i}")).await;
        }
        for i in 0..50 {
            assert_eq!(b_client.try_recv(), Some(format!("msg-{i}")));
        }
    }
}
