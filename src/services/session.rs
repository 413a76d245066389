use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::Backend;
use crate::error::{Error, Result};
use crate::models::auth::{AuthEvent, AuthSession, Principal};
use crate::models::profile::Profile;
use crate::services::metrics::SESSION_TRANSITIONS;
use crate::services::privilege::{self, PrivilegeState};
use crate::services::profile::{self, SeedIdentities};

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN_SECS: i64 = 60;
const REFRESH_CHECK_SECS: u64 = 15;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Resolving,
    Authenticated,
    Unauthenticated,
}

impl SessionPhase {
    fn label(self) -> &'static str {
        match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Resolving => "resolving",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Unauthenticated => "unauthenticated",
        }
    }
}

/// Published snapshot of the process-wide session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub principal: Option<Principal>,
    pub profile: Option<Profile>,
    pub privilege: PrivilegeState,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn uninitialized() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            principal: None,
            profile: None,
            privilege: PrivilegeState::loading(),
            expires_at: None,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            principal: None,
            profile: None,
            privilege: PrivilegeState::decided(false),
            expires_at: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub fn is_superadmin(&self) -> bool {
        self.is_authenticated() && self.privilege.is_superadmin
    }
}

/// Owns the authenticated session. State changes only through the methods
/// below; everyone else reads snapshots or subscribes.
pub struct SessionHolder {
    backend: Arc<dyn Backend>,
    seeds: SeedIdentities,
    tx: watch::Sender<SessionState>,
    /// Serializes state-changing operations, including event handling.
    ops: Mutex<()>,
}

impl SessionHolder {
    pub fn new(backend: Arc<dyn Backend>, config: &Config) -> Self {
        let (tx, _) = watch::channel(SessionState::uninitialized());
        Self {
            backend,
            seeds: SeedIdentities::from_config(config),
            tx,
            ops: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    fn publish(&self, state: SessionState) {
        let phase = state.phase;
        let changed = self.tx.borrow().phase != phase;
        self.tx.send_replace(state);
        if changed {
            SESSION_TRANSITIONS.with_label_values(&[phase.label()]).inc();
            tracing::info!("Session is now {}", phase.label());
        }
    }

    /// Loads whatever session the backend client already holds.
    pub async fn initialize(&self) -> SessionState {
        let _guard = self.ops.lock().await;
        self.publish(SessionState {
            phase: SessionPhase::Resolving,
            ..SessionState::uninitialized()
        });
        match self.backend.current_session().await {
            Ok(Some(session)) => self.establish(session).await,
            Ok(None) => self.publish(SessionState::unauthenticated()),
            Err(e) => {
                tracing::warn!("Could not load the current session: {e}");
                self.publish(SessionState::unauthenticated());
            }
        }
        self.snapshot()
    }

    /// A failed sign-in leaves the published state as it was.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionState> {
        let _guard = self.ops.lock().await;
        let session = self.backend.sign_in(email.trim(), password).await?;
        self.establish(session).await;
        Ok(self.snapshot())
    }

    /// Local state is cleared whatever the backend answers; its error is
    /// still returned so the caller can report it.
    pub async fn sign_out(&self) -> Result<()> {
        let _guard = self.ops.lock().await;
        let result = self.backend.sign_out().await;
        self.publish(SessionState::unauthenticated());
        if let Err(e) = &result {
            tracing::warn!("Remote sign-out failed, local session cleared anyway: {e}");
        }
        result
    }

    pub async fn refresh(&self) -> Result<SessionState> {
        let _guard = self.ops.lock().await;
        if !self.snapshot().is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        match self.backend.refresh_session().await {
            Ok(session) => {
                self.apply_refresh(&session);
                Ok(self.snapshot())
            }
            Err(Error::Unauthenticated) => {
                tracing::warn!("Backend no longer accepts the session; signing out locally");
                self.publish(SessionState::unauthenticated());
                Err(Error::Unauthenticated)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_display_name(&self, name: &str) -> Result<Principal> {
        let _guard = self.ops.lock().await;
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("display name must not be empty".into()));
        }
        if !self.snapshot().is_authenticated() {
            return Err(Error::Unauthenticated);
        }
        let principal = self
            .backend
            .update_user_metadata(profile::display_name_patch(name))
            .await?;
        self.apply_principal(principal.clone());
        Ok(principal)
    }

    /// Reacts to a session change reported by the backend client.
    pub async fn handle_event(&self, event: AuthEvent) {
        let _guard = self.ops.lock().await;
        let current = self.snapshot();
        match event {
            AuthEvent::SignedIn(session) => {
                let same = current.is_authenticated()
                    && current.principal.as_ref().map(|p| p.id) == Some(session.principal.id);
                if !same {
                    self.establish(session).await;
                }
            }
            AuthEvent::SignedOut => {
                if current.phase != SessionPhase::Unauthenticated {
                    self.publish(SessionState::unauthenticated());
                }
            }
            AuthEvent::TokenRefreshed(session) => {
                if current.is_authenticated() {
                    self.apply_refresh(&session);
                }
            }
            AuthEvent::UserUpdated(principal) => {
                if current.is_authenticated() {
                    self.apply_principal(principal);
                }
            }
        }
    }

    /// Resolving → Authenticated: profile first, then privilege, which may
    /// use the profile's role.
    async fn establish(&self, session: AuthSession) {
        let principal = session.principal;
        self.publish(SessionState {
            phase: SessionPhase::Resolving,
            principal: Some(principal.clone()),
            profile: None,
            privilege: PrivilegeState::loading(),
            expires_at: Some(session.expires_at),
        });

        let profile = profile::load_profile(self.backend.as_ref(), &principal, &self.seeds).await;
        let (is_superadmin, decision) =
            privilege::classify(self.backend.as_ref(), &principal, Some(&profile), &self.seeds.superadmin_email).await;
        tracing::info!("{} signed in (superadmin: {is_superadmin}, decided by {decision:?})", principal.email);

        self.publish(SessionState {
            phase: SessionPhase::Authenticated,
            principal: Some(principal),
            profile: Some(profile),
            privilege: PrivilegeState::decided(is_superadmin),
            expires_at: Some(session.expires_at),
        });
    }

    fn apply_refresh(&self, session: &AuthSession) {
        self.tx.send_modify(|state| {
            state.expires_at = Some(session.expires_at);
            state.principal = Some(session.principal.clone());
        });
    }

    fn apply_principal(&self, principal: Principal) {
        self.tx.send_modify(|state| state.principal = Some(principal));
    }

    /// Spawn the task forwarding backend auth events into the holder.
    pub fn listen(self: &Arc<Self>) -> JoinHandle<()> {
        let holder = Arc::clone(self);
        let mut events = holder.backend.auth_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => holder.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Session listener skipped {n} auth events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Spawn the task refreshing the access token shortly before expiry.
    pub fn start_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let holder = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(REFRESH_CHECK_SECS)).await;
                let state = holder.snapshot();
                let Some(expires_at) = state.expires_at.filter(|_| state.is_authenticated()) else {
                    continue;
                };
                if (expires_at - Utc::now()).num_seconds() > REFRESH_MARGIN_SECS {
                    continue;
                }
                if let Err(e) = holder.refresh().await {
                    tracing::error!("Token refresh failed: {e}");
                }
            }
        })
    }
}
