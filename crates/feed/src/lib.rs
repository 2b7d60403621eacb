//! District Care feed core.
//!
//! A feed shows one scope's reports a page at a time, newest first, next to
//! live status counters for the same scope. Pages are fetched on demand
//! through the [`DocumentStore`] cursor chain; counters come from a standing
//! subscription. The two paths are independent: one failing never blocks the
//! other.

#![forbid(unsafe_code)]

pub mod aggregate;
pub mod config;
pub mod edits;
pub mod feed;
pub mod gate;
pub mod geo;
pub mod pager;
pub mod portal;
pub mod scope;
pub mod session;

pub use dcare_store::DocumentStore;
pub use config::FeedConfig;
pub use edits::PendingEdit;
pub use feed::{open_feed, CommitOutcome, FeedHandle, FeedView, PageOutcome};
pub use gate::{authorize, Decision, DenyReason, Redirect, Requirement};
pub use geo::{annotate, distance_km, AnnotatedRecord};
pub use pager::{page_window, PageLink, PageState};
pub use portal::{Portal, SurfaceFeed};
pub use scope::{can_edit, dashboard_landing, parse_route_dept, resolve, Landing, Surface};
pub use session::{MemoryProfiles, MemorySession, ProfileDirectory, SessionProvider, SessionState};
