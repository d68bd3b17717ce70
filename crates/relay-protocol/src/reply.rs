//! Server replies.
//!
//! Replies are the only lines the server itself authors. Chat messages are
//! relayed untouched and never wrapped in a reply.

use crate::key::{InviteKey, KEY_LENGTH};
use std::fmt;

/// Prefix of system notices.
pub const SYSTEM_PREFIX: &str = "[System]";

/// Prefix of error lines.
pub const ERROR_PREFIX: &str = "[Error]";

const CREATED_MARKER: &str = "Invite key: ";

/// Error conditions reported to a client before its connection is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The first message was not a valid command.
    InvalidCommand,
    /// The invite key is unknown or its channel is gone.
    InvalidInviteKey,
    /// The server refuses to open more channels.
    ChannelLimitReached,
    /// No free invite key could be allocated.
    KeySpaceExhausted,
    /// The connection is already a member of a channel.
    AlreadyMember,
}

impl ErrorCode {
    /// Human-readable message sent to the client.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCommand => "Invalid command.",
            ErrorCode::InvalidInviteKey => "Invalid invite key.",
            ErrorCode::ChannelLimitReached => "Server is at channel capacity.",
            ErrorCode::KeySpaceExhausted => "Could not allocate an invite key.",
            ErrorCode::AlreadyMember => "Already in a channel.",
        }
    }

    /// Short machine name, used as a metrics label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidCommand => "invalid_command",
            ErrorCode::InvalidInviteKey => "invalid_invite_key",
            ErrorCode::ChannelLimitReached => "channel_limit",
            ErrorCode::KeySpaceExhausted => "key_space_exhausted",
            ErrorCode::AlreadyMember => "already_member",
        }
    }
}

/// A line authored by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Greeting listing the available commands.
    Welcome,
    /// A channel was created; carries its invite key.
    ChannelCreated(InviteKey),
    /// The client joined an existing channel.
    Joined,
    /// The session is rejected and about to close.
    Error(ErrorCode),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Welcome => f.write_str(
                "Welcome to the chat!\nCommands: 'create' to make a channel, 'join <invite-key>' to join one.",
            ),
            Reply::ChannelCreated(key) => {
                write!(f, "{SYSTEM_PREFIX} Channel created! {CREATED_MARKER}{key}")
            }
            Reply::Joined => write!(f, "{SYSTEM_PREFIX} Joined channel! You can now chat."),
            Reply::Error(code) => write!(f, "{ERROR_PREFIX} {}", code.message()),
        }
    }
}

/// Pull the invite key out of a channel-created line.
///
/// Returns `None` for any other line.
#[must_use]
pub fn extract_invite_key(line: &str) -> Option<InviteKey> {
    let line = line.trim();
    if !line.starts_with(SYSTEM_PREFIX) {
        return None;
    }
    let start = line.find(CREATED_MARKER)? + CREATED_MARKER.len();
    let candidate = line.get(start..start + KEY_LENGTH)?;
    InviteKey::parse(candidate).ok()
}
