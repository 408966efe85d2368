//! Privileged-access authorization chain. An ordered list of strategies is
//! consulted: role on the profile row, then the membership table, then a
//! static allow-list. Each stage answers granted / denied / unknown and the
//! chain short-circuits on the first definite answer. A lookup failure is
//! `Unknown` and falls through to the next stage rather than failing the
//! whole check; the allow-list always answers definitively, so the chain
//! never grants on error, it only consults the last resort.

use tracing::{debug, warn};

use super::privileged::PrivilegeRank;
use super::profile::Role;
use crate::store::ProfileStore;

/// One allow-list entry: exact email match mapped to a rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListEntry {
    pub email: String,
    pub rank: PrivilegeRank,
}

/// Answer from a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzDecision {
    Granted(PrivilegeRank),
    Denied,
    Unknown,
}

/// Final answer from the chain. `Indeterminate` is only produced by the
/// caller when the whole check fails to complete (transport loss, timeout),
/// never by the stages themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzOutcome {
    Granted(PrivilegeRank),
    Denied,
    Indeterminate,
}

/// Stage tags, evaluated in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzStage {
    StoreRole,
    Membership,
    AllowList,
}

pub struct Authorizer {
    stages: Vec<AuthzStage>,
    allow_list: Vec<AllowListEntry>,
}

impl Authorizer {
    pub fn new(allow_list: Vec<AllowListEntry>) -> Self {
        Self {
            stages: vec![
                AuthzStage::StoreRole,
                AuthzStage::Membership,
                AuthzStage::AllowList,
            ],
            allow_list,
        }
    }

    async fn evaluate_stage(
        &self,
        stage: AuthzStage,
        store: &dyn ProfileStore,
        id: &str,
        email: &str,
    ) -> AuthzDecision {
        match stage {
            AuthzStage::StoreRole => match store.get_by_id(id).await {
                Ok(Some(row)) if row.role == Some(Role::Academy) => {
                    AuthzDecision::Granted(PrivilegeRank::Owner)
                }
                Ok(_) => AuthzDecision::Unknown,
                Err(e) => {
                    warn!(target: "sessium::authz", "role lookup failed id={}: {}", id, e);
                    AuthzDecision::Unknown
                }
            },
            AuthzStage::Membership => match store.active_membership(id).await {
                Ok(true) => AuthzDecision::Granted(PrivilegeRank::Staff),
                Ok(false) => AuthzDecision::Unknown,
                Err(e) => {
                    warn!(target: "sessium::authz", "membership lookup failed id={}: {}", id, e);
                    AuthzDecision::Unknown
                }
            },
            AuthzStage::AllowList => {
                match self.allow_list.iter().find(|e| e.email == email) {
                    Some(entry) => AuthzDecision::Granted(entry.rank),
                    None => AuthzDecision::Denied,
                }
            }
        }
    }

    /// Run the chain for a principal. Short-circuits on the first definite
    /// answer; `Unknown` falls through.
    pub async fn authorize(&self, store: &dyn ProfileStore, id: &str, email: &str) -> AuthzOutcome {
        for stage in &self.stages {
            match self.evaluate_stage(*stage, store, id, email).await {
                AuthzDecision::Granted(rank) => {
                    debug!(target: "sessium::authz", "granted id={} stage={:?} rank={:?}", id, stage, rank);
                    return AuthzOutcome::Granted(rank);
                }
                AuthzDecision::Denied => {
                    debug!(target: "sessium::authz", "denied id={} stage={:?}", id, stage);
                    return AuthzOutcome::Denied;
                }
                AuthzDecision::Unknown => {}
            }
        }
        // Chain exhausted without a definite answer; the allow-list stage
        // always answers, so this is unreachable with the default stages.
        AuthzOutcome::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Profile;
    use crate::store::{MembershipRecord, MemoryProfileStore};

    fn allow(email: &str, rank: PrivilegeRank) -> Vec<AllowListEntry> {
        vec![AllowListEntry {
            email: email.into(),
            rank,
        }]
    }

    #[tokio::test]
    async fn store_role_wins_first() {
        let store = MemoryProfileStore::new();
        let mut row = Profile::seeded("p1", "a@example.com");
        row.role = Some(Role::Academy);
        store.seed(row);
        let authz = Authorizer::new(Vec::new());
        assert_eq!(
            authz.authorize(&store, "p1", "a@example.com").await,
            AuthzOutcome::Granted(PrivilegeRank::Owner)
        );
    }

    #[tokio::test]
    async fn membership_grants_staff() {
        let store = MemoryProfileStore::new();
        store.add_membership(MembershipRecord {
            principal_id: "p2".into(),
            valid_until: None,
        });
        let authz = Authorizer::new(Vec::new());
        assert_eq!(
            authz.authorize(&store, "p2", "b@example.com").await,
            AuthzOutcome::Granted(PrivilegeRank::Staff)
        );
    }

    #[tokio::test]
    async fn allow_list_is_last_resort() {
        let store = MemoryProfileStore::new();
        let authz = Authorizer::new(allow("c@example.com", PrivilegeRank::Owner));
        assert_eq!(
            authz.authorize(&store, "p3", "c@example.com").await,
            AuthzOutcome::Granted(PrivilegeRank::Owner)
        );
        assert_eq!(
            authz.authorize(&store, "p4", "nobody@example.com").await,
            AuthzOutcome::Denied
        );
    }
}
