use serde::{Deserialize, Serialize};
use tracing::warn;

/// Privilege ranks recognised by the authorization chain. Two ranks only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeRank {
    Owner,
    Staff,
}

/// A principal confirmed to hold elevated access. This is a projection
/// computed by the authorization chain, mirrored into the profile store and
/// the local identity cache; the cached copy is a fast path, never the
/// source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrivilegedIdentity {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub rank: PrivilegeRank,
}

impl PrivilegedIdentity {
    /// Encode for the local identity cache.
    pub fn to_snapshot(&self) -> String {
        // Serialization of a plain struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a cache snapshot; a corrupt or stale-format entry is a cache
    /// miss, not an error.
    pub fn from_snapshot(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(target: "sessium::identity", "discarding unreadable identity snapshot: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trip() {
        let ident = PrivilegedIdentity {
            id: "p9".into(),
            email: "ops@example.com".into(),
            display_name: "ops".into(),
            rank: PrivilegeRank::Owner,
        };
        let raw = ident.to_snapshot();
        assert_eq!(PrivilegedIdentity::from_snapshot(&raw), Some(ident));
    }

    #[test]
    fn corrupt_snapshot_is_a_miss() {
        assert_eq!(PrivilegedIdentity::from_snapshot("{not json"), None);
    }
}
