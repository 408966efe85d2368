//! Profile store boundary. Backs the standard engine's profile rows and the
//! privileged engine's role/membership lookups. The in-memory implementation
//! is the default for embedded use and tests; remote backends implement the
//! same trait.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::identity::{Profile, ProfileUpdate, Role};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("duplicate profile for principal {0}")]
    Duplicate(String),
    #[error("no profile for principal {0}")]
    Missing(String),
    #[error("role already assigned for principal {id}: {existing}")]
    RoleAssigned { id: String, existing: Role },
}

/// Row in the secondary membership table consulted by the authorization
/// chain. A membership is active while `valid_until` is unset or in the
/// future.
#[derive(Debug, Clone)]
pub struct MembershipRecord {
    pub principal_id: String,
    pub valid_until: Option<DateTime<Utc>>,
}

impl MembershipRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.map(|until| until > now).unwrap_or(true)
    }
}

/// Backing-store boundary for profile rows and memberships.
pub trait ProfileStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> BoxFuture<'_, Result<Option<Profile>, StoreError>>;

    /// Insert a new row; `Duplicate` when the principal already has one.
    fn insert(&self, row: Profile) -> BoxFuture<'_, Result<Profile, StoreError>>;

    /// Partial update; only fields the patch defines are written. Returns
    /// the row as stored after the update.
    fn update(&self, id: &str, patch: ProfileUpdate)
        -> BoxFuture<'_, Result<Profile, StoreError>>;

    /// Compare-and-set for the write-once role: assigns only while the
    /// stored role is null, otherwise fails with `RoleAssigned`.
    fn assign_role(&self, id: &str, role: Role) -> BoxFuture<'_, Result<Profile, StoreError>>;

    /// Insert-or-replace, used when mirroring a confirmed privileged
    /// identity into the store.
    fn upsert(&self, row: Profile) -> BoxFuture<'_, Result<Profile, StoreError>>;

    /// Whether the principal holds an active membership row.
    fn active_membership(&self, id: &str) -> BoxFuture<'_, Result<bool, StoreError>>;
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, Profile>,
    memberships: Vec<MembershipRecord>,
}

/// In-memory profile store.
#[derive(Default)]
pub struct MemoryProfileStore {
    tables: RwLock<Tables>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_membership(&self, record: MembershipRecord) {
        self.tables.write().memberships.push(record);
    }

    /// Seed a row directly, bypassing the engine path. Test/bootstrap helper.
    pub fn seed(&self, row: Profile) {
        self.tables.write().profiles.insert(row.id.clone(), row);
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get_by_id(&self, id: &str) -> BoxFuture<'_, Result<Option<Profile>, StoreError>> {
        let id = id.to_string();
        async move { Ok(self.tables.read().profiles.get(&id).cloned()) }.boxed()
    }

    fn insert(&self, row: Profile) -> BoxFuture<'_, Result<Profile, StoreError>> {
        async move {
            let mut t = self.tables.write();
            if t.profiles.contains_key(&row.id) {
                return Err(StoreError::Duplicate(row.id));
            }
            t.profiles.insert(row.id.clone(), row.clone());
            Ok(row)
        }
        .boxed()
    }

    fn update(
        &self,
        id: &str,
        patch: ProfileUpdate,
    ) -> BoxFuture<'_, Result<Profile, StoreError>> {
        let id = id.to_string();
        async move {
            let mut t = self.tables.write();
            let row = t
                .profiles
                .get_mut(&id)
                .ok_or_else(|| StoreError::Missing(id.clone()))?;
            patch.apply_to(row);
            Ok(row.clone())
        }
        .boxed()
    }

    fn assign_role(&self, id: &str, role: Role) -> BoxFuture<'_, Result<Profile, StoreError>> {
        let id = id.to_string();
        async move {
            let mut t = self.tables.write();
            let row = t
                .profiles
                .get_mut(&id)
                .ok_or_else(|| StoreError::Missing(id.clone()))?;
            if let Some(existing) = row.role {
                return Err(StoreError::RoleAssigned { id, existing });
            }
            row.role = Some(role);
            Ok(row.clone())
        }
        .boxed()
    }

    fn upsert(&self, row: Profile) -> BoxFuture<'_, Result<Profile, StoreError>> {
        async move {
            self.tables
                .write()
                .profiles
                .insert(row.id.clone(), row.clone());
            Ok(row)
        }
        .boxed()
    }

    fn active_membership(&self, id: &str) -> BoxFuture<'_, Result<bool, StoreError>> {
        let id = id.to_string();
        async move {
            let now = Utc::now();
            Ok(self
                .tables
                .read()
                .memberships
                .iter()
                .any(|m| m.principal_id == id && m.is_active(now)))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = MemoryProfileStore::new();
        let row = Profile::seeded("p1", "a@example.com");
        store.insert(row.clone()).await.unwrap();
        assert!(matches!(
            store.insert(row).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn assign_role_is_write_once() {
        let store = MemoryProfileStore::new();
        store.seed(Profile::seeded("p1", "a@example.com"));
        let row = store.assign_role("p1", Role::Teacher).await.unwrap();
        assert_eq!(row.role, Some(Role::Teacher));
        assert!(matches!(
            store.assign_role("p1", Role::Student).await,
            Err(StoreError::RoleAssigned {
                existing: Role::Teacher,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn membership_expiry() {
        let store = MemoryProfileStore::new();
        store.add_membership(MembershipRecord {
            principal_id: "p1".into(),
            valid_until: Some(Utc::now() - Duration::days(1)),
        });
        assert!(!store.active_membership("p1").await.unwrap());
        store.add_membership(MembershipRecord {
            principal_id: "p1".into(),
            valid_until: None,
        });
        assert!(store.active_membership("p1").await.unwrap());
    }
}
