//! Per-connection session handling.
//!
//! A session walks one connection through
//! `Connected → AwaitingCommand → (Creating | Joining) → InChannel → Closed`:
//! greet the client, read its single opening command, create or join a
//! channel, then relay every text frame to the other members until the
//! connection goes away. Any failure before `InChannel` is reported with one
//! error line and ends the session.

use crate::broadcast::Broadcaster;
use crate::observer::{NoopObserver, RelayObserver};
use crate::registry::{ChannelId, ChannelRegistry, RegistryError};
use relay_protocol::{Command, CommandError, ErrorCode, InviteKey, Reply};
use std::sync::Arc;
use std::time::Instant;
use tenvis_relay_transport::{Connection, ConnectionId, Inbound, TransportError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Connection accepted, welcome not yet sent.
    Connected,
    /// Waiting for the opening command.
    AwaitingCommand,
    /// Creating a new channel.
    Creating,
    /// Joining an existing channel.
    Joining,
    /// Relaying chat messages.
    InChannel,
    /// Session over.
    Closed,
}

/// Reasons a session ends before reaching `InChannel`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The opening message was not a valid command.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The opening message was a binary frame.
    #[error("Expected a text command, got a binary frame")]
    BinaryCommand,

    /// The registry refused to create or join.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A reply could not be delivered.
    #[error("Reply failed: {0}")]
    Send(#[from] TransportError),
}

impl SessionError {
    /// The error line to send to the client, if one can still be sent.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            SessionError::Command(CommandError::InvalidCommand(_)) | SessionError::BinaryCommand => {
                Some(ErrorCode::InvalidCommand)
            }
            SessionError::Command(CommandError::MalformedKey(_)) => {
                Some(ErrorCode::InvalidInviteKey)
            }
            SessionError::Registry(e) => Some(match e {
                RegistryError::InvalidInviteKey(_) | RegistryError::UnknownChannel(_) => {
                    ErrorCode::InvalidInviteKey
                }
                RegistryError::AlreadyMember { .. } => ErrorCode::AlreadyMember,
                RegistryError::KeySpaceExhausted(_) => ErrorCode::KeySpaceExhausted,
                RegistryError::ChannelLimitReached => ErrorCode::ChannelLimitReached,
            }),
            SessionError::Send(_) => None,
        }
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The connection went away before joining a channel.
    Disconnected {
        /// State the session was in when the connection closed.
        during: SessionState,
    },
    /// The session was refused.
    Rejected(SessionError),
    /// The session joined a channel and later left it.
    Left {
        /// The channel that was joined.
        channel: ChannelId,
        /// Number of chat messages relayed from this connection.
        relayed: u64,
    },
}

/// Runs sessions against a shared registry.
#[derive(Clone)]
pub struct SessionHandler {
    registry: Arc<ChannelRegistry>,
    broadcaster: Broadcaster,
    observer: Arc<dyn RelayObserver>,
}

impl SessionHandler {
    /// Create a new session handler.
    #[must_use]
    pub fn new(registry: Arc<ChannelRegistry>, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report session events to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RelayObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get the registry sessions run against.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Run a session to completion.
    ///
    /// The connection is closed when this returns, and it is no longer a
    /// member of any channel.
    pub async fn run(&self, conn: Arc<dyn Connection>) -> SessionOutcome {
        let mut session = Session {
            handler: self,
            conn,
            state: SessionState::Connected,
        };
        debug!(connection = %session.conn.id(), "Session started");

        let outcome = match session.open().await {
            Ok(Some(membership)) => session.relay(membership).await,
            Ok(None) => SessionOutcome::Disconnected {
                during: session.state,
            },
            Err(error) => session.reject(error).await,
        };

        session.transition(SessionState::Closed);
        if let Err(e) = session.conn.close().await {
            trace!(connection = %session.conn.id(), error = %e, "Close failed");
        }
        debug!(connection = %session.conn.id(), outcome = ?outcome, "Session closed");
        outcome
    }
}

/// Keeps a connection in its channel until dropped.
///
/// Dropping the guard removes the member on every exit path, including
/// panics and cancellation of the session task.
struct Membership {
    registry: Arc<ChannelRegistry>,
    observer: Arc<dyn RelayObserver>,
    channel: ChannelId,
    connection: ConnectionId,
}

impl Drop for Membership {
    fn drop(&mut self) {
        if self.registry.remove_member(self.channel, &self.connection) {
            self.observer.member_left(self.channel);
        }
    }
}

struct Session<'a> {
    handler: &'a SessionHandler,
    conn: Arc<dyn Connection>,
    state: SessionState,
}

impl Session<'_> {
    fn transition(&mut self, next: SessionState) {
        trace!(connection = %self.conn.id(), from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    async fn send(&self, reply: Reply) -> Result<(), TransportError> {
        self.conn.send_text(&reply.to_string()).await
    }

    /// Greet, read the opening command and enter a channel.
    ///
    /// Returns `Ok(None)` if the connection closed before sending a command.
    async fn open(&mut self) -> Result<Option<Membership>, SessionError> {
        self.send(Reply::Welcome).await?;
        self.transition(SessionState::AwaitingCommand);

        let Some(line) = self.read_command().await? else {
            return Ok(None);
        };

        let membership = match Command::parse(&line)? {
            Command::Create => {
                self.transition(SessionState::Creating);
                let (membership, key) = self.create()?;
                self.send(Reply::ChannelCreated(key)).await?;
                membership
            }
            Command::Join(key) => {
                self.transition(SessionState::Joining);
                let membership = self.join(&key)?;
                self.send(Reply::Joined).await?;
                membership
            }
        };

        Ok(Some(membership))
    }

    async fn read_command(&self) -> Result<Option<String>, SessionError> {
        loop {
            match self.conn.recv().await {
                Ok(Some(Inbound::Text(line))) => return Ok(Some(line)),
                Ok(Some(Inbound::Control)) => continue,
                Ok(Some(Inbound::Binary(_))) => return Err(SessionError::BinaryCommand),
                Ok(None) => return Ok(None),
                Err(e) => {
                    debug!(connection = %self.conn.id(), error = %e, "Receive failed before command");
                    return Ok(None);
                }
            }
        }
    }

    fn create(&self) -> Result<(Membership, InviteKey), SessionError> {
        let registry = &self.handler.registry;
        let (channel, key) = registry.create_channel()?;

        if let Err(e) = registry.add_member(channel, self.conn.clone()) {
            registry.discard_if_empty(channel);
            return Err(e.into());
        }
        self.handler.observer.channel_created(channel);

        debug!(connection = %self.conn.id(), channel = %channel, "Channel created");
        Ok((self.membership(channel), key))
    }

    fn join(&self, key: &InviteKey) -> Result<Membership, SessionError> {
        let registry = &self.handler.registry;
        let channel = registry.join(key)?;
        registry.add_member(channel, self.conn.clone())?;
        self.handler.observer.member_joined(channel);

        debug!(connection = %self.conn.id(), channel = %channel, "Joined channel");
        Ok(self.membership(channel))
    }

    fn membership(&self, channel: ChannelId) -> Membership {
        Membership {
            registry: self.handler.registry.clone(),
            observer: self.handler.observer.clone(),
            channel,
            connection: self.conn.id().clone(),
        }
    }

    /// Relay text frames until the connection closes.
    async fn relay(&mut self, membership: Membership) -> SessionOutcome {
        self.transition(SessionState::InChannel);
        let channel = membership.channel;
        let mut relayed = 0u64;

        loop {
            match self.conn.recv().await {
                Ok(Some(Inbound::Text(text))) => {
                    let start = Instant::now();
                    let report = self
                        .handler
                        .broadcaster
                        .broadcast(channel, self.conn.id(), &text)
                        .await;
                    relayed += 1;

                    trace!(
                        channel = %channel,
                        connection = %self.conn.id(),
                        delivered = report.delivered,
                        message = %text,
                        "Relayed"
                    );
                    self.handler
                        .observer
                        .message_relayed(text.len(), &report, start.elapsed());
                }
                Ok(Some(Inbound::Binary(data))) => {
                    trace!(connection = %self.conn.id(), bytes = data.len(), "Ignoring binary frame");
                }
                Ok(Some(Inbound::Control)) => {}
                Ok(None) => break,
                Err(e) => {
                    debug!(connection = %self.conn.id(), error = %e, "Receive failed");
                    break;
                }
            }
        }

        drop(membership);
        SessionOutcome::Left { channel, relayed }
    }

    async fn reject(&self, error: SessionError) -> SessionOutcome {
        warn!(connection = %self.conn.id(), state = ?self.state, error = %error, "Session rejected");

        if let Some(code) = error.error_code() {
            self.handler.observer.session_rejected(code);
            if let Err(e) = self.send(Reply::Error(code)).await {
                debug!(connection = %self.conn.id(), error = %e, "Failed to send error reply");
            }
        }

        SessionOutcome::Rejected(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use relay_protocol::extract_invite_key;
    use tenvis_relay_transport::memory::{self, MemoryClient};
    use tokio::task::JoinHandle;

    fn handler() -> SessionHandler {
        handler_with(ChannelRegistry::new())
    }

    fn handler_with(registry: ChannelRegistry) -> SessionHandler {
        let registry = Arc::new(registry);
        SessionHandler::new(registry.clone(), Broadcaster::new(registry))
    }

    /// Open a session and consume the welcome line.
    async fn connect(handler: &SessionHandler) -> (MemoryClient, JoinHandle<SessionOutcome>) {
        let (conn, mut client) = memory::pair();
        let handler = handler.clone();
        let task = tokio::spawn(async move { handler.run(Arc::new(conn)).await });

        let welcome = client.recv().await.unwrap();
        assert_eq!(welcome, Reply::Welcome.to_string());
        (client, task)
    }

    async fn create(handler: &SessionHandler) -> (MemoryClient, JoinHandle<SessionOutcome>, InviteKey) {
        let (mut client, task) = connect(handler).await;
        client.send_text("create").unwrap();
        let line = client.recv().await.unwrap();
        let key = extract_invite_key(&line).unwrap();
        (client, task, key)
    }

    async fn join(
        handler: &SessionHandler,
        key: &InviteKey,
    ) -> (MemoryClient, JoinHandle<SessionOutcome>) {
        let (mut client, task) = connect(handler).await;
        client.send_text(format!("join {key}")).unwrap();
        assert_eq!(client.recv().await.unwrap(), Reply::Joined.to_string());
        (client, task)
    }

    #[tokio::test]
    async fn test_create_then_chat() {
        let handler = handler();
        let (mut a, task_a, key) = create(&handler).await;
        assert_eq!(key.as_str().len(), 6);

        let (mut b, task_b) = join(&handler, &key).await;

        a.send_text("hello").unwrap();
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
        b.send_text("hi").unwrap();
        assert_eq!(a.recv().await.as_deref(), Some("hi"));
        assert_eq!(a.try_recv(), None);

        drop(a);
        drop(b);
        assert!(matches!(
            task_a.await.unwrap(),
            SessionOutcome::Left { relayed: 1, .. }
        ));
        assert!(matches!(
            task_b.await.unwrap(),
            SessionOutcome::Left { relayed: 1, .. }
        ));
        assert_eq!(handler.registry().stats().channel_count, 0);
    }

    #[tokio::test]
    async fn test_join_unknown_key() {
        let handler = handler();
        let (mut c, task) = connect(&handler).await;

        c.send_text("join ZZZZZZ").unwrap();
        assert_eq!(
            c.recv().await.unwrap(),
            Reply::Error(ErrorCode::InvalidInviteKey).to_string()
        );
        assert!(matches!(
            task.await.unwrap(),
            SessionOutcome::Rejected(SessionError::Registry(RegistryError::InvalidInviteKey(_)))
        ));
        // Connection closed, registry untouched.
        assert_eq!(c.recv().await, None);
        assert_eq!(handler.registry().stats().invite_count, 0);
    }

    #[tokio::test]
    async fn test_creator_leaves_channel_survives() {
        let handler = handler();
        let (a, task_a, key) = create(&handler).await;
        let (_b, _task_b) = join(&handler, &key).await;

        drop(a);
        task_a.await.unwrap();

        let channel = handler.registry().join(&key).unwrap();
        assert_eq!(handler.registry().member_count(channel), 1);

        let (_c, _task_c) = join(&handler, &key).await;
        assert_eq!(handler.registry().member_count(channel), 2);
    }

    #[tokio::test]
    async fn test_everyone_leaves_key_retired() {
        let handler = handler();
        let (a, task_a, key) = create(&handler).await;
        let (b, task_b) = join(&handler, &key).await;

        drop(a);
        drop(b);
        task_a.await.unwrap();
        task_b.await.unwrap();

        let (mut c, task_c) = connect(&handler).await;
        c.send_text(format!("join {key}")).unwrap();
        assert_eq!(
            c.recv().await.unwrap(),
            Reply::Error(ErrorCode::InvalidInviteKey).to_string()
        );
        assert!(matches!(
            task_c.await.unwrap(),
            SessionOutcome::Rejected(_)
        ));
        assert_eq!(handler.registry().stats().channel_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_command_closes() {
        let handler = handler();
        for line in ["hello", "join", "create please", "join A B"] {
            let (mut c, task) = connect(&handler).await;
            c.send_text(line).unwrap();
            assert_eq!(
                c.recv().await.unwrap(),
                Reply::Error(ErrorCode::InvalidCommand).to_string()
            );
            assert_eq!(c.recv().await, None);
            assert!(matches!(
                task.await.unwrap(),
                SessionOutcome::Rejected(SessionError::Command(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_malformed_key_reports_invalid_key() {
        let handler = handler();
        let (mut c, task) = connect(&handler).await;
        c.send_text("join abc").unwrap();
        assert_eq!(
            c.recv().await.unwrap(),
            Reply::Error(ErrorCode::InvalidInviteKey).to_string()
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_command_rejected_and_pings_skipped() {
        let handler = handler();
        let (mut c, task) = connect(&handler).await;
        c.send_control().unwrap();
        c.send_binary(vec![1u8, 2, 3]).unwrap();
        assert_eq!(
            c.recv().await.unwrap(),
            Reply::Error(ErrorCode::InvalidCommand).to_string()
        );
        assert!(matches!(
            task.await.unwrap(),
            SessionOutcome::Rejected(SessionError::BinaryCommand)
        ));
    }

    #[tokio::test]
    async fn test_non_text_frames_ignored_in_channel() {
        let handler = handler();
        let (a, _task_a, key) = create(&handler).await;
        let (mut b, _task_b) = join(&handler, &key).await;

        a.send_binary(vec![0u8; 4]).unwrap();
        a.send_control().unwrap();
        a.send_text("after").unwrap();
        assert_eq!(b.recv().await.as_deref(), Some("after"));
        assert_eq!(b.try_recv(), None);
    }

    #[tokio::test]
    async fn test_disconnect_before_command() {
        let handler = handler();
        let (c, task) = connect(&handler).await;
        drop(c);
        assert!(matches!(
            task.await.unwrap(),
            SessionOutcome::Disconnected {
                during: SessionState::AwaitingCommand
            }
        ));
    }

    #[tokio::test]
    async fn test_channel_limit_rejects_create() {
        let handler = handler_with(ChannelRegistry::with_config(RegistryConfig {
            max_channels: 1,
            ..Default::default()
        }));
        let (_a, _task_a, _key) = create(&handler).await;

        let (mut b, task_b) = connect(&handler).await;
        b.send_text("create").unwrap();
        assert_eq!(
            b.recv().await.unwrap(),
            Reply::Error(ErrorCode::ChannelLimitReached).to_string()
        );
        task_b.await.unwrap();
        assert_eq!(handler.registry().stats().channel_count, 1);
    }

    #[tokio::test]
    async fn test_evicted_member_session_ends() {
        let handler = handler();
        let (mut a, _task_a, key) = create(&handler).await;
        let (mut b, task_b) = join(&handler, &key).await;
        let (mut c, _task_c) = join(&handler, &key).await;

        b.close_reader();
        a.send_text("ping all").unwrap();
        assert_eq!(c.recv().await.as_deref(), Some("ping all"));

        // B's session is woken by the eviction and exits on its own.
        assert!(matches!(
            task_b.await.unwrap(),
            SessionOutcome::Left { relayed: 0, .. }
        ));
        let channel = handler.registry().join(&key).unwrap();
        assert_eq!(handler.registry().member_count(channel), 2);
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_reply_failure_releases_membership() {
        let handler = handler();
        let (mut client, task) = connect(&handler).await;
        client.close_reader();
        client.send_text("create").unwrap();

        assert!(matches!(
            task.await.unwrap(),
            SessionOutcome::Rejected(SessionError::Send(_))
        ));
        let stats = handler.registry().stats();
        assert_eq!(stats.channel_count, 0);
        assert_eq!(stats.member_count, 0);
    }
}
