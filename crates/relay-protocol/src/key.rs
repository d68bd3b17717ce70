//! Invite keys.
//!
//! An invite key is a short, human-typable token that resolves to a channel.

use std::fmt;

/// Number of symbols in an invite key.
pub const KEY_LENGTH: usize = 6;

/// Symbols an invite key is drawn from.
pub const KEY_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A well-formed invite key: exactly [`KEY_LENGTH`] symbols from [`KEY_ALPHABET`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InviteKey(String);

impl InviteKey {
    /// Parse a key typed by a client.
    ///
    /// Lowercase letters are accepted and normalized to uppercase.
    ///
    /// # Errors
    ///
    /// Returns an error message if the key has the wrong length or contains
    /// symbols outside the alphabet.
    pub fn parse(input: &str) -> Result<Self, &'static str> {
        if input.len() != KEY_LENGTH {
            return Err("Invite key must be 6 characters");
        }
        let normalized = input.to_ascii_uppercase();
        if !normalized.bytes().all(|b| KEY_ALPHABET.contains(&b)) {
            return Err("Invite key contains invalid characters");
        }
        Ok(Self(normalized))
    }

    /// Build a key by drawing one alphabet index per symbol.
    ///
    /// Indices are reduced modulo the alphabet size, so the result is always
    /// well-formed.
    #[must_use]
    pub fn from_fn(mut next_index: impl FnMut() -> usize) -> Self {
        let key = (0..KEY_LENGTH)
            .map(|_| KEY_ALPHABET[next_index() % KEY_ALPHABET.len()] as char)
            .collect();
        Self(key)
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InviteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
