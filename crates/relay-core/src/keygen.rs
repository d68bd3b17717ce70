//! Invite key generation.
//!
//! Keys are drawn uniformly from the 36-symbol alphabet with a
//! non-cryptographic thread-local RNG. They are meant to be hard to stumble
//! upon, not to withstand a determined attacker: anyone holding a key can join
//! its channel, and channels carry nothing but chat text.

use rand::Rng;
use relay_protocol::{InviteKey, KEY_ALPHABET};

/// A source of invite keys.
///
/// Generated keys are not required to be unique; the registry rejects keys
/// that collide with a live one and asks again.
pub trait KeyGenerator: Send + Sync {
    /// Produce a candidate key.
    fn generate(&self) -> InviteKey;
}

/// Uniform random keys from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> InviteKey {
        let mut rng = rand::rng();
        InviteKey::from_fn(|| rng.random_range(0..KEY_ALPHABET.len()))
    }
}

/// Replays a fixed list of keys, cycling when exhausted.
#[cfg(test)]
pub(crate) struct ScriptedKeys {
    keys: Vec<InviteKey>,
    next: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedKeys {
    pub(crate) fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| InviteKey::parse(k).unwrap()).collect(),
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
impl KeyGenerator for ScriptedKeys {
    fn generate(&self) -> InviteKey {
        let n = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.keys[n % self.keys.len()].clone()
    }
}
