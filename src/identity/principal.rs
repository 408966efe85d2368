use serde::{Deserialize, Serialize};

/// The identity-provider-issued subject of a session. Immutable for the
/// lifetime of a session; everything the application knows beyond id + email
/// lives on the Profile row instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub email: String,
}

/// A live remote session as reported by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub principal: Principal,
    pub access_token: String,
}

impl Session {
    pub fn principal_id(&self) -> &str {
        &self.principal.id
    }
}
