//! Standard-identity reconciliation engine. Merges the construction-time
//! session probe, the provider's notification stream, and the profile store
//! into one `{loading, identity}` state. Every signed-in principal gets (or
//! lazily creates) a profile row with one write-once role.

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
use crate::identity::{AuthEvent, AuthEventKind, Principal, Profile, ProfileUpdate, Role, Session, SessionSource};
use crate::store::ProfileStore;

use super::guards::Guards;
use super::state::{ReconciliationState, StateCell};

type FetchFuture = Shared<BoxFuture<'static, ()>>;

pub struct StandardEngine {
    source: Arc<dyn SessionSource>,
    store: Arc<dyn ProfileStore>,
    cfg: EngineConfig,
    state: StateCell<Profile>,
    guards: Mutex<Guards>,
    /// Single-flight profile fetch, keyed by principal id. Concurrent calls
    /// for the same principal await this same future; exactly one store
    /// round-trip runs.
    inflight: Mutex<Option<(String, FetchFuture)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Self-reference for building 'static single-flight futures.
    weak: Weak<StandardEngine>,
}

impl StandardEngine {
    /// Construct the engine and start its background work: the safety
    /// timeout, the bounded session probe, and the event pump. One instance
    /// per application; tear down with [`dispose`](Self::dispose).
    pub fn start(
        source: Arc<dyn SessionSource>,
        store: Arc<dyn ProfileStore>,
        cfg: EngineConfig,
    ) -> Arc<Self> {
        let events = source.subscribe();
        let engine = Arc::new_cyclic(|weak| Self {
            source,
            store,
            cfg,
            state: StateCell::new(),
            guards: Mutex::new(Guards::new()),
            inflight: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            weak: weak.clone(),
        });

        let safety = tokio::spawn(safety_timeout(Arc::downgrade(&engine)));
        let pump = tokio::spawn(event_pump(Arc::downgrade(&engine), events));
        let init = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.initialize().await })
        };
        engine.tasks.lock().extend([safety, pump, init]);
        engine
    }

    /// Read-only view of the reconciliation state.
    pub fn subscribe(&self) -> watch::Receiver<ReconciliationState<Profile>> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ReconciliationState<Profile> {
        self.state.snapshot()
    }

    /// Stop background work and forbid any further state mutation.
    pub fn dispose(&self) {
        self.guards.lock().disposed = true;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        *self.inflight.lock() = None;
    }

    /// Apply a state mutation unless the engine has been disposed.
    fn apply<F: FnOnce(&mut ReconciliationState<Profile>)>(&self, f: F) {
        if self.guards.lock().disposed {
            return;
        }
        self.state.update(f);
    }

    fn current_epoch(&self) -> u64 {
        self.guards.lock().epoch
    }

    /// Sign-out and no-session handling: clear identity, resolve loading,
    /// reset every guard, and supersede in-flight fetches.
    fn clear_session_state(&self) {
        {
            let mut g = self.guards.lock();
            if g.disposed {
                return;
            }
            g.reset();
        }
        *self.inflight.lock() = None;
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
            Some(s) => self.fetch_profile(s.principal).await,
            None => self.apply(|st| {
                st.identity = None;
                st.loading = false;
            }),
        }
    }

    /// Load (or lazily create) the profile for a principal and publish it.
    /// Idempotent per principal: a call while one is already in flight for
    /// the same id awaits that flight instead of issuing another query.
    pub async fn fetch_profile(&self, principal: Principal) {
        if self.guards.lock().disposed {
            return;
        }
        let flight = {
            let mut inflight = self.inflight.lock();
            match inflight.as_ref() {
                Some((id, fut)) if *id == principal.id => {
                    debug!(target: "sessium::engine", "fetch already in flight for {}", id);
                    fut.clone()
                }
                _ => {
                    let Some(engine) = self.weak.upgrade() else {
                        return;
                    };
                    // Superseding an in-flight fetch for another principal:
                    // bump the epoch so the old flight's late result is
                    // dropped instead of overwriting this one.
                    if let Some((prev, _)) = inflight.take() {
                        debug!(target: "sessium::engine", "fetch for {} supersedes in-flight fetch for {}", principal.id, prev);
                        self.guards.lock().epoch += 1;
                    }
                    let p = principal.clone();
                    let fut: FetchFuture =
                        async move { engine.fetch_profile_inner(p).await }.boxed().shared();
                    *inflight = Some((principal.id.clone(), fut.clone()));
                    fut
                }
            }
        };
        flight.await;
    }

    async fn fetch_profile_inner(self: Arc<Self>, principal: Principal) {
        let epoch = {
            let mut g = self.guards.lock();
            g.fetching_for = Some(principal.id.clone());
            g.epoch
        };
        self.apply(|s| s.loading = true);

        // Remote failures degrade to an empty identity; the error value is
        // logged, never propagated to a consumer.
        let row = match self.load_or_create(&principal).await {
            Ok(row) => row,
            Err(e) => {
                warn!(target: "sessium::engine", "profile reconciliation degraded id={}: {}", principal.id, e);
                None
            }
        };

        // Guard release happens on every path before the result is applied.
        self.guards.lock().fetching_for = None;
        {
            let mut inflight = self.inflight.lock();
            if matches!(inflight.as_ref(), Some((id, _)) if *id == principal.id) {
                *inflight = None;
            }
        }

        // A sign-out (or a fetch for a different principal) may have
        // superseded this flight; late results are dropped.
        if self.current_epoch() != epoch {
            debug!(target: "sessium::engine", "dropping superseded fetch result for {}", principal.id);
            return;
        }
        self.apply(|s| {
            s.identity = row;
            s.loading = false;
        });
    }

    async fn load_or_create(&self, principal: &Principal) -> AuthResult<Option<Profile>> {
        let found = match timeout(self.cfg.fetch_timeout, self.store.get_by_id(&principal.id)).await
        {
            Ok(Ok(row)) => row,
            Ok(Err(e)) => return Err(AuthError::lookup(e.to_string())),
            Err(_) => return Err(AuthError::timeout("profile lookup")),
        };
        if let Some(row) = found {
            return Ok(Some(row));
        }
        // First reconciliation for this principal: create the row lazily.
        let seeded = Profile::seeded(&principal.id, &principal.email);
        match timeout(self.cfg.fetch_timeout, self.store.insert(seeded)).await {
            Ok(Ok(row)) => {
                info!(target: "sessium::engine", "created profile for {}", principal.id);
                Ok(Some(row))
            }
            Ok(Err(e)) => Err(AuthError::create(e.to_string())),
            Err(_) => Err(AuthError::timeout("profile create")),
        }
    }

    async fn handle_event(&self, ev: AuthEvent) {
        if self.guards.lock().disposed {
            return;
        }
        // Sign-out always wins, checked before anything else.
        if ev.kind == AuthEventKind::SignedOut {
            info!(target: "sessium::engine", "signed-out event; clearing session state");
            self.clear_session_state();
            return;
        }
        let Some(session) = ev.session else {
            // No session attached to any event means the same thing.
            self.clear_session_state();
            return;
        };
        match ev.kind {
            AuthEventKind::SignedIn => self.handle_signed_in(session, ev.via_redirect).await,
            AuthEventKind::InitialSession => {
                if self.guards.lock().initializing {
                    // The construction-time probe covers this window.
                    debug!(target: "sessium::engine", "initial-session ignored during initialization");
                    return;
                }
                self.handle_signed_in(session, ev.via_redirect).await;
            }
            AuthEventKind::TokenRefreshed => {
                // Defensive re-sync only when no identity is currently set.
                if self.state.snapshot().identity.is_none() {
                    self.fetch_profile(session.principal).await;
                }
            }
            // Handled above before the session was unwrapped.
            AuthEventKind::SignedOut => {}
        }
    }

    async fn handle_signed_in(&self, session: Session, via_redirect: bool) {
        let duplicate = !via_redirect
            && self
                .state
                .snapshot()
                .identity
                .map(|p| p.id == session.principal_id())
                .unwrap_or(false);
        if duplicate {
            // Tab-visibility echo for the already-current principal.
            debug!(target: "sessium::engine", "duplicate signed-in for current principal {}", session.principal_id());
            return;
        }
        if self.guards.lock().fetching_for.as_deref() == Some(session.principal_id()) {
            // A fetch for this principal is already in flight and will
            // publish its own result.
            debug!(target: "sessium::engine", "signed-in while already fetching {}", session.principal_id());
            return;
        }
        self.guards.lock().oauth_in_flight = false;
        self.fetch_profile(session.principal).await;
    }

    /// Begin a redirect-based sign-in that lands on `return_path` after the
    /// OAuth callback (the configured default when `None`). A duplicate call
    /// while one is in flight is a no-op. On failure the loading flag and
    /// guard are reset so the UI is never stuck spinning.
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

    /// Clear local state immediately, then revoke the remote session best
    /// effort. The local clear is authoritative for the UI either way.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.clear_session_state();
        if let Err(e) = self.source.sign_out().await {
            warn!(target: "sessium::engine", "remote sign-out failed (local state already cleared): {}", e);
            return Err(AuthError::sign_out(e.to_string()));
        }
        Ok(())
    }

    /// Assign the write-once role. Fails with `AlreadyAssigned` when a role
    /// is present in memory or, defensively, on a fresh store read — two
    /// tabs racing the first assignment resolve to one winner.
    pub async fn update_role(&self, role: Role) -> AuthResult<Profile> {
        let ident = self
            .state
            .snapshot()
            .identity
            .ok_or_else(|| AuthError::update("no signed-in profile"))?;
        if let Some(existing) = ident.role {
            return Err(AuthError::AlreadyAssigned { existing });
        }
        match timeout(self.cfg.fetch_timeout, self.store.get_by_id(&ident.id)).await {
            Ok(Ok(Some(row))) => {
                if let Some(existing) = row.role {
                    return Err(AuthError::AlreadyAssigned { existing });
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => return Err(AuthError::lookup(e.to_string())),
            Err(_) => return Err(AuthError::timeout("role re-check")),
        }
        let updated = match timeout(self.cfg.fetch_timeout, self.store.assign_role(&ident.id, role))
            .await
        {
            Ok(Ok(row)) => row,
            Ok(Err(crate::store::StoreError::RoleAssigned { existing, .. })) => {
                return Err(AuthError::AlreadyAssigned { existing })
            }
            Ok(Err(e)) => return Err(AuthError::update(e.to_string())),
            Err(_) => return Err(AuthError::timeout("role assignment")),
        };
        self.apply(|s| s.identity = Some(updated.clone()));
        info!(target: "sessium::engine", "role assigned id={} role={}", updated.id, role);
        Ok(updated)
    }

    /// Partial profile update: only fields the patch defines are written; a
    /// cleared field is stored as null. Failures come back as values, never
    /// panics.
    pub async fn update_profile(&self, patch: ProfileUpdate) -> AuthResult<Profile> {
        let ident = self
            .state
            .snapshot()
            .identity
            .ok_or_else(|| AuthError::update("no signed-in profile"))?;
        match timeout(self.cfg.fetch_timeout, self.store.update(&ident.id, patch)).await {
            Ok(Ok(row)) => {
                self.apply(|s| s.identity = Some(row.clone()));
                Ok(row)
            }
            Ok(Err(e)) => Err(AuthError::update(e.to_string())),
            Err(_) => Err(AuthError::timeout("profile update")),
        }
    }
}

async fn safety_timeout(engine: Weak<StandardEngine>) {
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

async fn event_pump(engine: Weak<StandardEngine>, mut events: broadcast::Receiver<AuthEvent>) {
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
