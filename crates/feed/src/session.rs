//! Session state as seen by the feed, plus in-memory providers.

use std::sync::{Arc, Mutex};

use dcare_core::{Principal, Profile, StoreError};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::gate::{authorize, Decision, Requirement};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Principal or profile lookup still in flight.
    #[default]
    Resolving,
    SignedOut,
    SignedIn { principal: Principal, profile: Option<Profile> },
}

impl SessionState {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            SessionState::SignedIn { principal, .. } => Some(principal),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            SessionState::SignedIn { profile, .. } => profile.as_ref(),
            _ => None,
        }
    }

    pub fn is_resolving(&self) -> bool { matches!(self, SessionState::Resolving) }

    pub fn authorize(&self, requirement: &Requirement) -> Decision {
        if self.is_resolving() {
            return Decision::Pending;
        }
        match authorize(self.principal(), self.profile(), requirement) {
            Ok(()) => Decision::Allow,
            Err(reason) => Decision::Deny(reason),
        }
    }
}

pub trait SessionProvider: Send + Sync {
    fn current(&self) -> SessionState;

    /// Receiver that wakes on every session change.
    fn on_change(&self) -> watch::Receiver<SessionState>;
}

/// Profile documents keyed by principal id.
#[async_trait::async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Stored profile, or a freshly written public one on first session.
    async fn get_or_create(&self, principal: &Principal) -> Result<Profile, StoreError>;
}

#[derive(Default)]
pub struct MemoryProfiles {
    map: Mutex<FxHashMap<String, Profile>>,
}

impl MemoryProfiles {
    pub fn new() -> Self { Self::default() }

    pub fn put(&self, profile: Profile) { self.map.lock().unwrap_or_else(|e| e.into_inner()).insert(profile.id.clone(), profile); }

    pub fn get(&self, id: &str) -> Option<Profile> { self.map.lock().unwrap_or_else(|e| e.into_inner()).get(id).cloned() }
}

#[async_trait::async_trait]
impl ProfileDirectory for MemoryProfiles {
    async fn get_or_create(&self, principal: &Principal) -> Result<Profile, StoreError> {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        let profile = map.entry(principal.id.clone()).or_insert_with(|| {
            info!(uid = %principal.id, "profile: created default public profile");
            Profile::default_for(principal)
        });
        Ok(profile.clone())
    }
}

/// Session provider driven by explicit sign-in/sign-out calls.
pub struct MemorySession {
    tx: watch::Sender<SessionState>,
    profiles: Arc<dyn ProfileDirectory>,
}

impl MemorySession {
    pub fn new(profiles: Arc<dyn ProfileDirectory>) -> Self {
        let (tx, _) = watch::channel(SessionState::Resolving);
        Self { tx, profiles }
    }

    /// Sign in and load the profile. The state stays `Resolving` until the
    /// profile lookup finishes.
    pub async fn sign_in(&self, principal: Principal) -> Result<Profile, StoreError> {
        self.tx.send_replace(SessionState::Resolving);
        match self.profiles.get_or_create(&principal).await {
            Ok(profile) => {
                info!(uid = %principal.id, role = ?profile.role, dept = ?profile.department, "session: signed in");
                self.tx.send_replace(SessionState::SignedIn { principal, profile: Some(profile.clone()) });
                Ok(profile)
            }
            Err(e) => {
                warn!(uid = %principal.id, error = %e, "session: profile lookup failed");
                self.tx.send_replace(SessionState::SignedIn { principal, profile: None });
                Err(e)
            }
        }
    }

    /// Re-read the profile after an external change (e.g. an admin role grant).
    pub async fn reload_profile(&self) -> Result<(), StoreError> {
        let Some(principal) = self.current().principal().cloned() else { return Ok(()) };
        let profile = self.profiles.get_or_create(&principal).await?;
        self.tx.send_replace(SessionState::SignedIn { principal, profile: Some(profile) });
        Ok(())
    }

    pub fn sign_out(&self) {
        self.tx.send_replace(SessionState::SignedOut);
        info!("session: signed out");
    }
}

impl SessionProvider for MemorySession {
    fn current(&self) -> SessionState { self.tx.borrow().clone() }

    fn on_change(&self) -> watch::Receiver<SessionState> { self.tx.subscribe() }
}
