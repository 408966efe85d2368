//! Remote session source boundary and an embeddable in-memory provider.
//! The engine talks to the identity provider exclusively through the
//! `SessionSource` trait so tests and embedded deployments can substitute
//! their own implementation.

use anyhow::{anyhow, Result};
use base64::Engine;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use crate::tprintln;

use super::principal::{Principal, Session};

/// Session-lifecycle notification kinds emitted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    InitialSession,
    TokenRefreshed,
}

/// One provider notification. Events arrive in non-deterministic order and
/// may be duplicated; the engine's guards are responsible for making that
/// safe. `via_redirect` marks a signed-in event that continues an OAuth
/// redirect callback rather than a tab-visibility echo.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
    pub via_redirect: bool,
}

/// Boundary to the remote identity provider. Methods return boxed futures so
/// engines can hold the source as `Arc<dyn SessionSource>`.
pub trait SessionSource: Send + Sync {
    /// Query the provider for the current session, if any.
    fn current_session(&self) -> BoxFuture<'_, Result<Option<Session>>>;

    /// Start a redirect-based sign-in with the given post-auth landing page.
    /// On success the user agent navigates away; no local state change is
    /// expected until the page reloads.
    fn begin_redirect_sign_in(&self, return_path: &str) -> BoxFuture<'_, Result<()>>;

    /// Revoke the remote session. Best effort from the engine's point of
    /// view; local state clearing is authoritative for the UI.
    fn sign_out(&self) -> BoxFuture<'_, Result<()>>;

    /// Subscribe to session-lifecycle notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

fn gen_token() -> String {
    // 128-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// In-memory provider for embedded use and tests. Holds at most one current
/// session; sign-in is immediate rather than redirect-driven, but the event
/// stream carries the same notifications a remote provider would.
pub struct MemorySessionSource {
    current: RwLock<Option<Session>>,
    /// Landing page named by the most recent redirect sign-in request.
    return_path: RwLock<Option<String>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemorySessionSource {
    fn default() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            current: RwLock::new(None),
            return_path: RwLock::new(None),
            events,
        }
    }
}

impl MemorySessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a session for the principal and announce it. `via_redirect`
    /// marks the event as an OAuth-callback continuation.
    pub fn issue(&self, principal: Principal, via_redirect: bool) -> Session {
        let session = Session {
            access_token: gen_token(),
            principal,
        };
        *self.current.write() = Some(session.clone());
        tprintln!("session.issue user={}", session.principal.id);
        let _ = self.events.send(AuthEvent {
            kind: AuthEventKind::SignedIn,
            session: Some(session.clone()),
            via_redirect,
        });
        session
    }

    /// Emit an arbitrary notification without touching the stored session.
    /// Lets tests replay the provider's duplicate/out-of-order behavior.
    pub fn emit(&self, kind: AuthEventKind, session: Option<Session>, via_redirect: bool) {
        let _ = self.events.send(AuthEvent {
            kind,
            session,
            via_redirect,
        });
    }

    /// Landing page from the last `begin_redirect_sign_in`, if any.
    pub fn last_return_path(&self) -> Option<String> {
        self.return_path.read().clone()
    }

    /// Drop the current session and announce the sign-out.
    pub fn revoke(&self) {
        *self.current.write() = None;
        tprintln!("session.revoke");
        let _ = self.events.send(AuthEvent {
            kind: AuthEventKind::SignedOut,
            session: None,
            via_redirect: false,
        });
    }
}

impl SessionSource for MemorySessionSource {
    fn current_session(&self) -> BoxFuture<'_, Result<Option<Session>>> {
        async move { Ok(self.current.read().clone()) }.boxed()
    }

    fn begin_redirect_sign_in(&self, return_path: &str) -> BoxFuture<'_, Result<()>> {
        let return_path = return_path.to_string();
        async move {
            if return_path.is_empty() {
                return Err(anyhow!("empty return path"));
            }
            info!(target: "sessium::provider", "redirect sign-in requested return_path={}", return_path);
            *self.return_path.write() = Some(return_path);
            Ok(())
        }
        .boxed()
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.revoke();
            Ok(())
        }
        .boxed()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_then_current_session() {
        let src = MemorySessionSource::new();
        assert!(src.current_session().await.unwrap().is_none());
        let p = Principal {
            id: "u1".into(),
            email: "u1@example.com".into(),
        };
        let s = src.issue(p, false);
        assert!(!s.access_token.is_empty());
        let cur = src.current_session().await.unwrap().unwrap();
        assert_eq!(cur.principal.id, "u1");
    }

    #[tokio::test]
    async fn revoke_emits_signed_out() {
        let src = MemorySessionSource::new();
        let mut rx = src.subscribe();
        src.issue(
            Principal {
                id: "u1".into(),
                email: "u1@example.com".into(),
            },
            false,
        );
        src.revoke();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, AuthEventKind::SignedIn);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, AuthEventKind::SignedOut);
        assert!(second.session.is_none());
    }
}
