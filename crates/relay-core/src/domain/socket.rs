//! Socket ids: the identity of one live connection.
//!
//! Pusher clients expect ids of the form `"<digits>.<digits>"` and echo them
//! back inside channel authorization requests, so the format is part of the
//! protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    /// Generates a random socket id.
    ///
    /// The two halves come from the 128 random bits of a v4 UUID.  Random ids
    /// are unique with overwhelming probability; the connection registry
    /// still rejects the rare duplicate and asks for a fresh one.
    pub fn generate() -> Self {
        let bits = Uuid::new_v4().as_u128();
        let high = (bits >> 64) as u32 % 1_000_000_000 + 1;
        let low = bits as u32 % 1_000_000_000 + 1;
        Self(format!("{high}.{low}"))
    }

    /// Wraps an existing id string (used by tests and by frames echoing ids).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_id_has_pusher_format() {
        let id = SocketId::generate();
        let (high, low) = id.as_str().split_once('.').expect("dot separator");
        assert!(!high.is_empty() && high.chars().all(|c| c.is_ascii_digit()));
        assert!(!low.is_empty() && low.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_generated_ids_do_not_repeat() {
        let ids: HashSet<SocketId> = (0..1_000).map(|_| SocketId::generate()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
