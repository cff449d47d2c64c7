//! Entity identifiers.
//!
//! Ids are either derived deterministically from content (SHA256) or
//! generated randomly (UUID v4) for entities created by an operator.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Opaque string id shared by every entity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Hash `fields` joined by `|`; the first 8 digest bytes as hex.
    pub fn generate(fields: &[&str]) -> Self {
        let digest = Sha256::digest(fields.join("|").as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad, so width specifiers line up in tables
        f.pad(&self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityId").field(&self.0).finish()
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Type alias for tournament IDs
pub type TournamentId = EntityId;

/// Type alias for participant IDs (a player's entry in one tournament)
pub type ParticipantId = EntityId;

/// Type alias for player (account) IDs
pub type PlayerId = EntityId;

/// Type alias for match IDs
pub type MatchId = EntityId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let id1 = EntityId::generate(&["tournament-1", "3", "alice", "bob"]);
        let id2 = EntityId::generate(&["tournament-1", "3", "alice", "bob"]);
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_round_changes_match_id() {
        let r1 = EntityId::generate(&["tournament-1", "1", "alice", "bob"]);
        let r2 = EntityId::generate(&["tournament-1", "2", "alice", "bob"]);
        assert_ne!(r1, r2);
        assert_eq!(r1.as_str().len(), 16);
        assert!(r1.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(EntityId::random(), EntityId::random());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = EntityId::from("participant-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"participant-7\"");
        let deserialized: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_entity_id_display_pads() {
        let id = EntityId::from("abc123");
        assert_eq!(format!("{}", id), "abc123");
        assert_eq!(format!("[{:<8}]", id), "[abc123  ]");
        assert_eq!(format!("{:?}", id), "EntityId(\"abc123\")");
    }

    #[test]
    fn test_generate_joins_fields() {
        assert_eq!(EntityId::generate(&["a", "b"]), EntityId::generate(&["a|b"]));
        assert_ne!(EntityId::generate(&["a", "b"]), EntityId::generate(&["ab"]));
    }
}
