//! Privileged-identity reconciliation engine. Same shape as the standard
//! engine, with three differences: a locally cached snapshot is adopted
//! immediately on construction as a fast path, an authorization chain gates
//! access instead of a plain profile fetch, and a definite denial forces a
//! remote sign-out with a blocking notice naming the rejected email.

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AuthError, AuthResult};
use crate::identity::{
    AuthEvent, AuthEventKind, Authorizer, AuthzOutcome, Principal, PrivilegedIdentity, Profile,
    Role, SessionSource,
};
use crate::store::{IdentityCache, ProfileStore};

use super::guards::Guards;
use super::state::{ReconciliationState, StateCell};

/// Where the engine is being constructed. Background verification runs only
/// on privileged routes and OAuth callback continuations; everywhere else
/// the cached snapshot (or its absence) is the whole answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteContext {
    pub privileged_route: bool,
    pub oauth_callback: bool,
}

impl RouteContext {
    pub fn requires_verification(&self) -> bool {
        self.privileged_route || self.oauth_callback
    }
}

type AuthzFuture = Shared<BoxFuture<'static, ()>>;

pub struct PrivilegedEngine {
    source: Arc<dyn SessionSource>,
    store: Arc<dyn ProfileStore>,
    cache: Arc<dyn IdentityCache>,
    authorizer: Authorizer,
    cfg: EngineConfig,
    state: StateCell<PrivilegedIdentity>,
    guards: Mutex<Guards>,
    /// Single-flight authorization attempt for this page load. Overlapping
    /// callers await the first caller's flight instead of repeating the
    /// lookup chain.
    inflight: Mutex<Option<AuthzFuture>>,
    /// Rejected email from the last definite denial; readable until the
    /// engine is disposed.
    denial: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Self-reference for building 'static single-flight futures.
    weak: Weak<PrivilegedEngine>,
}

impl PrivilegedEngine {
    pub fn start(
        source: Arc<dyn SessionSource>,
        store: Arc<dyn ProfileStore>,
        cache: Arc<dyn IdentityCache>,
        cfg: EngineConfig,
        route: RouteContext,
    ) -> Arc<Self> {
        let events = source.subscribe();
        let authorizer = Authorizer::new(cfg.allow_list.clone());
        let engine = Arc::new_cyclic(|weak| Self {
            source,
            store,
            cache,
            authorizer,
            cfg,
            state: StateCell::new(),
            guards: Mutex::new(Guards::new()),
            inflight: Mutex::new(None),
            denial: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            weak: weak.clone(),
        });

        // Cache fast path: adopt a readable snapshot before any network
        // work. Advisory only; a definite denial or sign-out clears it.
        if let Some(ident) = engine
            .cache
            .read(&engine.cfg.cache_key)
            .and_then(|raw| PrivilegedIdentity::from_snapshot(&raw))
        {
            info!(target: "sessium::engine", "restored privileged identity from cache user={}", ident.id);
            engine.state.update(|s| {
                s.identity = Some(ident);
                s.loading = false;
            });
        }

        let safety = tokio::spawn(safety_timeout(Arc::downgrade(&engine)));
        let pump = tokio::spawn(event_pump(Arc::downgrade(&engine), events));
        engine.tasks.lock().extend([safety, pump]);

        if route.requires_verification() {
            let init = {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.initialize().await })
            };
            engine.tasks.lock().push(init);
        } else {
            engine.guards.lock().initializing = false;
            engine.apply(|s| s.loading = false);
        }
        engine
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState<PrivilegedIdentity>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ReconciliationState<PrivilegedIdentity> {
        self.state.snapshot()
    }

    /// Email rejected by the last definite denial, if any.
    pub fn denial(&self) -> Option<String> {
        self.denial.lock().clone()
    }

    pub fn dispose(&self) {
        self.guards.lock().disposed = true;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inflight.lock() = None;
    }

    fn apply<F: FnOnce(&mut ReconciliationState<PrivilegedIdentity>)>(&self, f: F) {
        if self.guards.lock().disposed {
            return;
        }
        self.state.update(f);
    }

    fn current_epoch(&self) -> u64 {
        self.guards.lock().epoch
    }

    fn clear_session_state(&self) {
        {
            let mut g = self.guards.lock();
            if g.disposed {
                return;
            }
            g.reset();
        }
        *self.inflight.lock() = None;
        self.cache.remove(&self.cfg.cache_key);
        self.state.update(|s| {
            s.identity = None;
            s.loading = false;
        });
    }

    async fn initialize(self: Arc<Self>) {
        let epoch = self.current_epoch();
        let session = match timeout(self.cfg.probe_timeout, self.source.current_session()).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                warn!(target: "sessium::engine", "session probe failed: {}", e);
                None
            }
            Err(_) => {
                debug!(target: "sessium::engine", "session probe timed out; treating as no session");
                None
            }
        };
        self.guards.lock().initializing = false;
        // A sign-out processed while the probe was outstanding already
        // settled the state; the probe's answer is stale.
        if self.current_epoch() != epoch {
            debug!(target: "sessium::engine", "dropping stale probe result");
            return;
        }
        match session {
            Some(s) => {
                let _ = self.check_authorization(s.principal).await;
            }
            None => {
                // No remote session. A cache-adopted identity stays put (the
                // cache is the fast path and only a definite sign-out or
                // denial clears it); otherwise this resolves to signed-out.
                self.apply(|s| s.loading = false);
            }
        }
    }

    /// Run the authorization chain for a principal and publish the outcome.
    /// Overlapping calls for the same page load collapse into one flight.
    pub async fn check_authorization(&self, principal: Principal) -> AuthResult<()> {
        if self.guards.lock().disposed {
            return Err(AuthError::Disposed);
        }
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                Some(fut) => {
                    debug!(target: "sessium::engine", "authorization already in flight; awaiting it");
                    fut.clone()
                }
                None => {
                    let Some(engine) = self.weak.upgrade() else {
                        return Err(AuthError::Disposed);
                    };
                    let p = principal.clone();
                    let fut: AuthzFuture = async move { engine.check_authorization_inner(p).await }
                        .boxed()
                        .shared();
                    *inflight = Some(fut.clone());
                    fut
                }
            }
        };
        flight.await;
        if let Some(email) = self.denial.lock().clone() {
            return Err(AuthError::AuthorizationDenied { email });
        }
        Ok(())
    }

    async fn check_authorization_inner(self: Arc<Self>, principal: Principal) {
        let epoch = {
            let mut g = self.guards.lock();
            g.processing_privileged = true;
            g.epoch
        };
        *self.denial.lock() = None;
        self.apply(|s| s.loading = true);

        let outcome = match timeout(
            self.cfg.fetch_timeout,
            self.authorizer
                .authorize(self.store.as_ref(), &principal.id, &principal.email),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(target: "sessium::engine", "authorization check timed out id={}", principal.id);
                AuthzOutcome::Indeterminate
            }
        };

        self.guards.lock().processing_privileged = false;
        *self.inflight.lock() = None;

        if self.current_epoch() != epoch {
            debug!(target: "sessium::engine", "dropping superseded authorization result for {}", principal.id);
            return;
        }

        match outcome {
            AuthzOutcome::Granted(rank) => {
                let display_name = principal
                    .email
                    .split('@')
                    .next()
                    .unwrap_or(&principal.email)
                    .to_string();
                let ident = PrivilegedIdentity {
                    id: principal.id.clone(),
                    email: principal.email.clone(),
                    display_name,
                    rank,
                };
                self.mirror_to_store(&ident).await;
                self.cache.write(&self.cfg.cache_key, &ident.to_snapshot());
                info!(target: "sessium::engine", "privileged identity confirmed user={} rank={:?}", ident.id, rank);
                self.apply(|s| {
                    s.identity = Some(ident);
                    s.loading = false;
                });
            }
            AuthzOutcome::Denied => {
                warn!(target: "sessium::engine", "authorization denied email={}", principal.email);
                *self.denial.lock() = Some(principal.email.clone());
                self.cache.remove(&self.cfg.cache_key);
                // Forced remote sign-out; its signed-out event also clears
                // local state, so a failure here only delays that clear.
                if let Err(e) = self.source.sign_out().await {
                    warn!(target: "sessium::engine", "forced sign-out failed: {}", e);
                }
                self.apply(|s| {
                    s.identity = None;
                    s.loading = false;
                });
            }
            AuthzOutcome::Indeterminate => {
                // A failed re-verification never retroactively clears an
                // identity that was already adopted.
                self.apply(|s| s.loading = false);
            }
        }
    }

    /// Mirror a confirmed identity into the profile store without clobbering
    /// an existing row's fields. Best effort.
    async fn mirror_to_store(&self, ident: &PrivilegedIdentity) {
        let row = match timeout(self.cfg.fetch_timeout, self.store.get_by_id(&ident.id)).await {
            Ok(Ok(Some(mut existing))) => {
                existing.email = ident.email.clone();
                if existing.full_name.is_none() {
                    existing.full_name = Some(ident.display_name.clone());
                }
                existing.role = Some(Role::Academy);
                existing
            }
            _ => {
                let mut seeded = Profile::seeded(&ident.id, &ident.email);
                seeded.full_name = Some(ident.display_name.clone());
                seeded.role = Some(Role::Academy);
                seeded
            }
        };
        match timeout(self.cfg.fetch_timeout, self.store.upsert(row)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(target: "sessium::engine", "profile mirror failed id={}: {}", ident.id, e)
            }
            Err(_) => warn!(target: "sessium::engine", "profile mirror timed out id={}", ident.id),
        }
    }

    async fn handle_event(&self, ev: AuthEvent) {
        if self.guards.lock().disposed {
            return;
        }
        if ev.kind == AuthEventKind::SignedOut {
            info!(target: "sessium::engine", "signed-out event; clearing session state");
            self.clear_session_state();
            return;
        }
        let Some(session) = ev.session else {
            self.clear_session_state();
            return;
        };
        match ev.kind {
            AuthEventKind::SignedIn => {
                let duplicate = !ev.via_redirect
                    && self
                        .state
                        .snapshot()
                        .identity
                        .map(|p| p.id == session.principal_id())
                        .unwrap_or(false);
                if duplicate {
                    debug!(target: "sessium::engine", "duplicate signed-in for current principal {}", session.principal_id());
                    return;
                }
                self.guards.lock().oauth_in_flight = false;
                let _ = self.check_authorization(session.principal).await;
            }
            AuthEventKind::InitialSession => {
                if self.guards.lock().initializing {
                    debug!(target: "sessium::engine", "initial-session ignored during initialization");
                    return;
                }
                let _ = self.check_authorization(session.principal).await;
            }
            AuthEventKind::TokenRefreshed => {
                let idle = !self.guards.lock().processing_privileged;
                if idle && self.state.snapshot().identity.is_none() {
                    let _ = self.check_authorization(session.principal).await;
                }
            }
            // Handled above before the session was unwrapped.
            AuthEventKind::SignedOut => {}
        }
    }

    /// Begin a redirect-based sign-in that lands on `return_path` after the
    /// OAuth callback (the configured default when `None`); duplicate calls
    /// while one is in flight are no-ops.
    pub async fn sign_in(&self, return_path: Option<&str>) -> AuthResult<()> {
        {
            let mut g = self.guards.lock();
            if g.disposed {
                return Err(AuthError::Disposed);
            }
            if g.oauth_in_flight {
                debug!(target: "sessium::engine", "sign-in already in flight");
                return Ok(());
            }
            g.oauth_in_flight = true;
        }
        self.apply(|s| s.loading = true);
        let return_path = return_path.unwrap_or(&self.cfg.post_auth_return);
        match self.source.begin_redirect_sign_in(return_path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.guards.lock().oauth_in_flight = false;
                self.apply(|s| s.loading = false);
                Err(AuthError::sign_in(e.to_string()))
            }
        }
    }

    /// Drop the cache entry first, then clear local state and revoke the
    /// remote session best effort.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.cache.remove(&self.cfg.cache_key);
        self.clear_session_state();
        if let Err(e) = self.source.sign_out().await {
            warn!(target: "sessium::engine", "remote sign-out failed (local state already cleared): {}", e);
            return Err(AuthError::sign_out(e.to_string()));
        }
        Ok(())
    }
}

async fn safety_timeout(engine: Weak<PrivilegedEngine>) {
    let bound = match engine.upgrade() {
        Some(e) => e.cfg.safety_timeout,
        None => return,
    };
    tokio::time::sleep(bound).await;
    if let Some(e) = engine.upgrade() {
        if e.state.snapshot().loading {
            warn!(target: "sessium::engine", "safety timeout elapsed; forcing loading=false");
            e.apply(|s| s.loading = false);
        }
    }
}

async fn event_pump(engine: Weak<PrivilegedEngine>, mut events: broadcast::Receiver<AuthEvent>) {
    loop {
        match events.recv().await {
            Ok(ev) => {
                let Some(e) = engine.upgrade() else { break };
                e.handle_event(ev).await;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(target: "sessium::engine", "event stream lagged; skipped {} notifications", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
