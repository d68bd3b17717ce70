//! Client commands.
//!
//! A client sends exactly one command, as its first text message, before it
//! is allowed to chat.

use crate::key::InviteKey;
use thiserror::Error;

/// Errors produced while parsing the first client message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Not a recognized command, or wrong number of arguments.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// `join` with a single argument that is not a well-formed key.
    #[error("Malformed invite key: {0}")]
    MalformedKey(&'static str),
}

/// The opening command of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a new channel and receive its invite key.
    Create,
    /// Join the channel the key refers to.
    Join(InviteKey),
}

impl Command {
    /// Parse a command line.
    ///
    /// Surrounding whitespace is ignored and the verb is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::InvalidCommand`] for unknown verbs or a wrong
    /// argument count, and [`CommandError::MalformedKey`] when the `join`
    /// argument cannot be an invite key.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        if verb.eq_ignore_ascii_case("create") && args.is_empty() {
            return Ok(Command::Create);
        }

        if verb.eq_ignore_ascii_case("join") && args.len() == 1 {
            let key = InviteKey::parse(args[0]).map_err(CommandError::MalformedKey)?;
            return Ok(Command::Join(key));
        }

        Err(CommandError::InvalidCommand(truncate(line.trim(), 64)))
    }

    /// Get the command verb.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Join(_) => "join",
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
