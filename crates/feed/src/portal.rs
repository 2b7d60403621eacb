//! Portal: opens gated feed surfaces for the current session and keeps them
//! in step with later session changes.

use std::ops::Deref;
use std::sync::Arc;

use dcare_core::{Department, FeedError, Scope};
use dcare_store::{CancelHandle, DocumentStore};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::feed::{open_feed, FeedHandle};
use crate::gate::Decision;
use crate::scope::{parse_route_dept, Surface};
use crate::session::{SessionProvider, SessionState};

pub struct Portal {
    store: Arc<dyn DocumentStore>,
    session: Arc<dyn SessionProvider>,
    config: FeedConfig,
}

/// A feed bound to a surface. Dropping it stops following the session;
/// the feed itself stops once its last handle is gone.
pub struct SurfaceFeed {
    feed: FeedHandle,
    _follower: CancelHandle,
}

impl Deref for SurfaceFeed {
    type Target = FeedHandle;

    fn deref(&self) -> &FeedHandle { &self.feed }
}

/// What the feed should do for a given session state.
#[derive(Debug, Clone, PartialEq)]
enum Follow {
    Wait,
    Scope(Option<Scope>),
    Revoke(FeedError),
}

fn follow(state: &SessionState, surface: Surface, route_dept: Option<Department>) -> Follow {
    if let Some(req) = surface.requirement() {
        match state.authorize(&req) {
            Decision::Pending => return Follow::Wait,
            Decision::Deny(reason) => return Follow::Revoke(reason.into()),
            Decision::Allow => {}
        }
    }
    match surface.resolve(state.profile(), route_dept) {
        Ok(scope) => Follow::Scope(Some(scope)),
        Err(FeedError::NoScope) => Follow::Scope(None),
        Err(e) => Follow::Revoke(e),
    }
}

async fn settled(rx: &mut watch::Receiver<SessionState>) -> Result<SessionState, FeedError> {
    loop {
        {
            let s = rx.borrow_and_update();
            if !s.is_resolving() {
                return Ok(s.clone());
            }
        }
        rx.changed().await.map_err(|_| FeedError::Unauthenticated)?;
    }
}

impl Portal {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<dyn SessionProvider>, config: FeedConfig) -> Self {
        Self { store, session, config }
    }

    pub fn session(&self) -> &Arc<dyn SessionProvider> { &self.session }

    /// Open `surface` for the current session. Waits while the session is
    /// still resolving; a denied session gets the terminal error back and no
    /// feed is opened.
    pub async fn open_surface(&self, surface: Surface, route_dept: Option<&str>) -> Result<SurfaceFeed, FeedError> {
        let route_dept = parse_route_dept(route_dept);
        let mut rx = self.session.on_change();
        let state = settled(&mut rx).await?;
        let scope = match follow(&state, surface, route_dept) {
            Follow::Scope(scope) => scope,
            Follow::Revoke(e) => {
                warn!(surface = ?surface, error = %e, "portal: access denied");
                return Err(e);
            }
            Follow::Wait => return Err(FeedError::Unauthenticated),
        };
        info!(surface = ?surface, scope = ?scope, "portal: opening surface");
        let feed = open_feed(Arc::clone(&self.store), scope, self.config.clone());

        let follower = feed.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let res = match follow(&state, surface, route_dept) {
                    Follow::Wait => continue,
                    Follow::Scope(scope) => {
                        debug!(surface = ?surface, scope = ?scope, "portal: session changed");
                        follower.set_scope(scope).await
                    }
                    Follow::Revoke(e) => follower.revoke(e).await,
                };
                if res.is_err() {
                    break;
                }
            }
        });
        Ok(SurfaceFeed { feed, _follower: CancelHandle::new(task) })
    }
}
