//! Backing-store boundaries: the profile table and the local identity cache.

mod cache;
mod profile_store;

pub use cache::{FileIdentityCache, IdentityCache, MemoryIdentityCache};
pub use profile_store::{MembershipRecord, MemoryProfileStore, ProfileStore, StoreError};
