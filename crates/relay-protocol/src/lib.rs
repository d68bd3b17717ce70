//! # relay-protocol
//!
//! Text protocol definitions for the Relay chat server.
//!
//! The protocol is line oriented and carried in UTF-8 text frames:
//!
//! - The server greets every connection with a welcome line.
//! - The client's first message is a [`Command`]: `create` or `join <KEY>`.
//! - The server answers with a [`Reply`] (invite key, confirmation or error).
//! - Every later text frame is chat, relayed verbatim to the other members.
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{Command, InviteKey, Reply};
//!
//! let command = Command::parse("join ab12cd").unwrap();
//! assert_eq!(command, Command::Join(InviteKey::parse("AB12CD").unwrap()));
//!
//! let reply = Reply::ChannelCreated(InviteKey::parse("AB12CD").unwrap());
//! assert_eq!(relay_protocol::extract_invite_key(&reply.to_string()).unwrap().as_str(), "AB12CD");
//! ```

pub mod command;
pub mod key;
pub mod reply;

pub use command::{Command, CommandError};
pub use key::{InviteKey, KEY_ALPHABET, KEY_LENGTH};
pub use reply::{extract_invite_key, ErrorCode, Reply};
