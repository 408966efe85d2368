//! Engine configuration: timeout bounds, the cache key for the privileged
//! snapshot, and the static allow-list consulted as the authorization
//! chain's last resort. `from_env` reads `SESSIUM_*` variables with the
//! defaults below.

use once_cell::sync::Lazy;
use std::time::Duration;

use crate::identity::{AllowListEntry, PrivilegeRank};

/// Built-in last-resort allow-list used when none is configured.
static DEFAULT_ALLOW_LIST: Lazy<Vec<AllowListEntry>> = Lazy::new(|| {
    vec![AllowListEntry {
        email: "admin@sessium.local".into(),
        rank: PrivilegeRank::Owner,
    }]
});

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard upper bound after which the engine forces `loading=false`
    /// regardless of outstanding calls.
    pub safety_timeout: Duration,
    /// Bound on the construction-time session probe; exceeding it is
    /// treated as "no session", not an error.
    pub probe_timeout: Duration,
    /// Bound on each profile/authorization round-trip.
    pub fetch_timeout: Duration,
    /// Cache key under which the privileged snapshot is stored.
    pub cache_key: String,
    /// Static allow-list, exact email match.
    pub allow_list: Vec<AllowListEntry>,
    /// Post-auth landing page handed to redirect sign-in.
    pub post_auth_return: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(10),
            cache_key: "privileged_identity".into(),
            allow_list: DEFAULT_ALLOW_LIST.clone(),
            post_auth_return: "/".into(),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Parse `email=rank` pairs separated by commas; rank is `owner` or `staff`.
/// Malformed entries are skipped.
fn parse_allow_list(raw: &str) -> Vec<AllowListEntry> {
    raw.split(',')
        .filter_map(|pair| {
            let (email, rank) = pair.split_once('=')?;
            let rank = match rank.trim() {
                "owner" => PrivilegeRank::Owner,
                "staff" => PrivilegeRank::Staff,
                _ => return None,
            };
            let email = email.trim();
            if email.is_empty() {
                return None;
            }
            Some(AllowListEntry {
                email: email.to_string(),
                rank,
            })
        })
        .collect()
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let base = Self::default();
        let allow_list = std::env::var("SESSIUM_ALLOW_LIST")
            .ok()
            .map(|raw| parse_allow_list(&raw))
            .filter(|l| !l.is_empty())
            .unwrap_or(base.allow_list);
        Self {
            safety_timeout: env_secs("SESSIUM_SAFETY_TIMEOUT_SECS", base.safety_timeout),
            probe_timeout: env_secs("SESSIUM_PROBE_TIMEOUT_SECS", base.probe_timeout),
            fetch_timeout: env_secs("SESSIUM_FETCH_TIMEOUT_SECS", base.fetch_timeout),
            cache_key: std::env::var("SESSIUM_CACHE_KEY").unwrap_or(base.cache_key),
            allow_list,
            post_auth_return: std::env::var("SESSIUM_RETURN_PATH").unwrap_or(base.post_auth_return),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_bounds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.safety_timeout, Duration::from_secs(10));
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert!(!cfg.allow_list.is_empty());
    }

    #[test]
    fn allow_list_parsing_skips_malformed_entries() {
        let list = parse_allow_list("a@x.com=owner, b@x.com=staff, c@x.com=king, =owner");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].email, "a@x.com");
        assert_eq!(list[0].rank, PrivilegeRank::Owner);
        assert_eq!(list[1].rank, PrivilegeRank::Staff);
    }
}
