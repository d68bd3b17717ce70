//! Channel registry for Relay.
//!
//! The registry owns every channel, its member set and its invite key. All
//! operations run under one registry-wide lock, so each of them is atomic
//! with respect to all others and membership snapshots are consistent.

use crate::keygen::{KeyGenerator, RandomKeyGenerator};
use relay_protocol::InviteKey;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tenvis_relay_transport::{Connection, ConnectionId};
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Opaque channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Allocate a fresh random channel identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The key is unknown or its channel is gone.
    #[error("Invalid invite key: {0}")]
    InvalidInviteKey(InviteKey),

    /// The channel was deleted.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// The connection already belongs to a channel.
    #[error("Connection {connection} is already a member of channel {channel}")]
    AlreadyMember {
        /// The connection being added.
        connection: ConnectionId,
        /// The channel it already belongs to.
        channel: ChannelId,
    },

    /// Every generated key collided with a live one.
    #[error("No free invite key after {0} attempts")]
    KeySpaceExhausted(usize),

    /// Maximum number of channels reached.
    #[error("Maximum channels reached")]
    ChannelLimitReached,
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of live channels.
    pub max_channels: usize,
    /// Key draws per channel creation before giving up.
    pub max_key_attempts: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels: 10_000,
            max_key_attempts: 16,
        }
    }
}

/// A live channel.
struct ChannelEntry {
    key: InviteKey,
    members: HashMap<ConnectionId, Arc<dyn Connection>>,
}

#[derive(Default)]
struct RegistryState {
    channels: HashMap<ChannelId, ChannelEntry>,
    keys: HashMap<InviteKey, ChannelId>,
    /// Reverse index: which channel each connection belongs to.
    memberships: HashMap<ConnectionId, ChannelId>,
}

/// The channel registry.
pub struct ChannelRegistry {
    state: Mutex<RegistryState>,
    keygen: Box<dyn KeyGenerator>,
    config: RegistryConfig,
}

impl ChannelRegistry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_key_generator(config, RandomKeyGenerator)
    }

    /// Create a new registry drawing keys from `keygen`.
    #[must_use]
    pub fn with_key_generator(config: RegistryConfig, keygen: impl KeyGenerator + 'static) -> Self {
        info!("Creating channel registry with config: {:?}", config);
        Self {
            state: Mutex::new(RegistryState::default()),
            keygen: Box::new(keygen),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every operation leaves the maps consistent before it can panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty channel and its invite key.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ChannelLimitReached`] when the channel limit
    /// is hit, and [`RegistryError::KeySpaceExhausted`] when no key free of
    /// collisions was drawn within the configured attempts.
    pub fn create_channel(&self) -> Result<(ChannelId, InviteKey), RegistryError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.channels.len() >= self.config.max_channels {
            return Err(RegistryError::ChannelLimitReached);
        }

        let mut key = None;
        for attempt in 1..=self.config.max_key_attempts {
            let candidate = self.keygen.generate();
            if !state.keys.contains_key(&candidate) {
                key = Some(candidate);
                break;
            }
            trace!(attempt, "Invite key collision");
        }
        let Some(key) = key else {
            warn!(
                attempts = self.config.max_key_attempts,
                live_keys = state.keys.len(),
                "Invite key space exhausted"
            );
            return Err(RegistryError::KeySpaceExhausted(self.config.max_key_attempts));
        };

        let mut channel_id = ChannelId::new();
        while state.channels.contains_key(&channel_id) {
            channel_id = ChannelId::new();
        }

        state.channels.insert(
            channel_id,
            ChannelEntry {
                key: key.clone(),
                members: HashMap::new(),
            },
        );
        state.keys.insert(key.clone(), channel_id);

        debug!(channel = %channel_id, key = %key, "Created channel");
        Ok((channel_id, key))
    }

    /// Resolve an invite key to its channel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidInviteKey`] if the key is unknown or
    /// its channel no longer exists. A key found pointing at a missing
    /// channel is retired on the spot.
    pub fn join(&self, key: &InviteKey) -> Result<ChannelId, RegistryError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(&channel_id) = state.keys.get(key) else {
            return Err(RegistryError::InvalidInviteKey(key.clone()));
        };

        if !state.channels.contains_key(&channel_id) {
            state.keys.remove(key);
            warn!(key = %key, channel = %channel_id, "Retired stale invite key");
            return Err(RegistryError::InvalidInviteKey(key.clone()));
        }

        Ok(channel_id)
    }

    /// Add a connection to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownChannel`] if the channel was deleted
    /// since it was resolved, and [`RegistryError::AlreadyMember`] if the
    /// connection already belongs to a channel.
    pub fn add_member(
        &self,
        channel_id: ChannelId,
        connection: Arc<dyn Connection>,
    ) -> Result<(), RegistryError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let connection_id = connection.id().clone();

        if let Some(&channel) = state.memberships.get(&connection_id) {
            return Err(RegistryError::AlreadyMember {
                connection: connection_id,
                channel,
            });
        }

        let entry = state
            .channels
            .get_mut(&channel_id)
            .ok_or(RegistryError::UnknownChannel(channel_id))?;

        entry.members.insert(connection_id.clone(), connection);
        state.memberships.insert(connection_id.clone(), channel_id);

        debug!(
            channel = %channel_id,
            connection = %connection_id,
            members = entry.members.len(),
            "Member added"
        );
        Ok(())
    }

    /// Remove a connection from a channel.
    ///
    /// Deletes the channel and retires its key when the last member leaves.
    /// Removing an absent member is a no-op. Returns `true` if the
    /// connection was a member.
    pub fn remove_member(&self, channel_id: ChannelId, connection_id: &ConnectionId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(entry) = state.channels.get_mut(&channel_id) else {
            return false;
        };
        if entry.members.remove(connection_id).is_none() {
            return false;
        }
        if state.memberships.get(connection_id) == Some(&channel_id) {
            state.memberships.remove(connection_id);
        }

        debug!(
            channel = %channel_id,
            connection = %connection_id,
            members = entry.members.len(),
            "Member removed"
        );

        if entry.members.is_empty() {
            let key = entry.key.clone();
            state.channels.remove(&channel_id);
            state.keys.remove(&key);
            debug!(channel = %channel_id, key = %key, "Deleted empty channel");
        }

        true
    }

    /// Delete a channel that never gained a member.
    ///
    /// Returns `true` if the channel existed and was empty.
    pub fn discard_if_empty(&self, channel_id: ChannelId) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;

        match state.channels.get(&channel_id) {
            Some(entry) if entry.members.is_empty() => {
                let key = entry.key.clone();
                state.channels.remove(&channel_id);
                state.keys.remove(&key);
                debug!(channel = %channel_id, "Discarded unused channel");
                true
            }
            _ => false,
        }
    }

    /// Snapshot the members of a channel.
    ///
    /// The snapshot is detached from the registry: members added or removed
    /// afterwards do not affect it. Unknown channels yield an empty list.
    #[must_use]
    pub fn members(&self, channel_id: ChannelId) -> Vec<Arc<dyn Connection>> {
        self.lock()
            .channels
            .get(&channel_id)
            .map(|entry| entry.members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn channel_exists(&self, channel_id: ChannelId) -> bool {
        self.lock().channels.contains_key(&channel_id)
    }

    /// Get the member count for a channel.
    #[must_use]
    pub fn member_count(&self, channel_id: ChannelId) -> usize {
        self.lock()
            .channels
            .get(&channel_id)
            .map(|entry| entry.members.len())
            .unwrap_or(0)
    }

    /// Get the channel a connection belongs to.
    #[must_use]
    pub fn channel_of(&self, connection_id: &ConnectionId) -> Option<ChannelId> {
        self.lock().memberships.get(connection_id).copied()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.lock();
        RegistryStats {
            channel_count: state.channels.len(),
            invite_count: state.keys.len(),
            member_count: state.memberships.len(),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of live channels.
    pub channel_count: usize,
    /// Number of live invite keys.
    pub invite_count: usize,
    /// Number of connections that are members of a channel.
    pub member_count: usize,
}
