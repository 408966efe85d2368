//! Unified error model for the reconciliation engines. Every remote-call
//! failure is caught at the engine boundary and converted into either a
//! state transition or one of these values; nothing propagates past the
//! engine to crash a consumer. The absence of a session is not an error.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::identity::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    SignInFailed { message: String },
    SignOutFailed { message: String },
    ProfileLookupFailed { message: String },
    ProfileCreateFailed { message: String },
    AlreadyAssigned { existing: Role },
    UpdateFailed { message: String },
    AuthorizationDenied { email: String },
    Timeout { what: String },
    Disposed,
}

impl AuthError {
    pub fn sign_in<S: Into<String>>(msg: S) -> Self {
        AuthError::SignInFailed { message: msg.into() }
    }
    pub fn sign_out<S: Into<String>>(msg: S) -> Self {
        AuthError::SignOutFailed { message: msg.into() }
    }
    pub fn lookup<S: Into<String>>(msg: S) -> Self {
        AuthError::ProfileLookupFailed { message: msg.into() }
    }
    pub fn create<S: Into<String>>(msg: S) -> Self {
        AuthError::ProfileCreateFailed { message: msg.into() }
    }
    pub fn update<S: Into<String>>(msg: S) -> Self {
        AuthError::UpdateFailed { message: msg.into() }
    }
    pub fn timeout<S: Into<String>>(what: S) -> Self {
        AuthError::Timeout { what: what.into() }
    }

    /// Human-readable message suitable for a transient UI notice.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::SignInFailed { message } => format!("Sign-in failed: {}", message),
            AuthError::SignOutFailed { message } => format!("Sign-out failed: {}", message),
            AuthError::ProfileLookupFailed { message } => {
                format!("Could not load your profile: {}", message)
            }
            AuthError::ProfileCreateFailed { message } => {
                format!("Could not create your profile: {}", message)
            }
            AuthError::AlreadyAssigned { existing } => format!(
                "A role is already assigned to this account ({}). Please sign in instead.",
                existing
            ),
            AuthError::UpdateFailed { message } => format!("Update failed: {}", message),
            AuthError::AuthorizationDenied { email } => {
                format!("Access denied for {}.", email)
            }
            AuthError::Timeout { what } => format!("Timed out waiting for {}.", what),
            AuthError::Disposed => "This session view is no longer active.".to_string(),
        }
    }

    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::SignInFailed { .. }
                | AuthError::SignOutFailed { .. }
                | AuthError::ProfileLookupFailed { .. }
                | AuthError::UpdateFailed { .. }
                | AuthError::Timeout { .. }
        )
    }
}

impl Display for AuthError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::SignInFailed { message } => write!(f, "sign_in_failed: {}", message),
            AuthError::SignOutFailed { message } => write!(f, "sign_out_failed: {}", message),
            AuthError::ProfileLookupFailed { message } => {
                write!(f, "profile_lookup_failed: {}", message)
            }
            AuthError::ProfileCreateFailed { message } => {
                write!(f, "profile_create_failed: {}", message)
            }
            AuthError::AlreadyAssigned { existing } => {
                write!(f, "already_assigned: {}", existing)
            }
            AuthError::UpdateFailed { message } => write!(f, "update_failed: {}", message),
            AuthError::AuthorizationDenied { email } => {
                write!(f, "authorization_denied: {}", email)
            }
            AuthError::Timeout { what } => write!(f, "timeout: {}", what),
            AuthError::Disposed => write!(f, "disposed"),
        }
    }
}

impl std::error::Error for AuthError {}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::UpdateFailed {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_messages_name_the_detail() {
        let e = AuthError::AlreadyAssigned {
            existing: Role::Teacher,
        };
        assert!(e.user_message().contains("teacher"));
        let e = AuthError::AuthorizationDenied {
            email: "x@example.com".into(),
        };
        assert!(e.user_message().contains("x@example.com"));
    }

    #[test]
    fn retryability() {
        assert!(AuthError::timeout("session probe").is_retryable());
        assert!(!AuthError::AlreadyAssigned {
            existing: Role::Student
        }
        .is_retryable());
        assert!(!AuthError::Disposed.is_retryable());
    }
}
