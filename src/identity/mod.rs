//! Identity model and provider boundary for session reconciliation.
//! Keep the public surface thin and split implementation across sub-modules.

mod authorizer;
mod principal;
mod privileged;
mod profile;
mod provider;

pub use authorizer::{AllowListEntry, AuthzDecision, AuthzOutcome, AuthzStage, Authorizer};
pub use principal::{Principal, Session};
pub use privileged::{PrivilegeRank, PrivilegedIdentity};
pub use profile::{is_profile_complete, Patch, Profile, ProfileUpdate, Role};
pub use provider::{AuthEvent, AuthEventKind, MemorySessionSource, SessionSource};
