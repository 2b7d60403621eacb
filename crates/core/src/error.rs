use serde::{Deserialize, Serialize};

/// Errors surfaced by a feed to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum FeedError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("no department resolved from route or profile")]
    NoScope,
    #[error("subscription: {0}")]
    Subscription(String),
    #[error("fetch: {message}")]
    Fetch { message: String, timed_out: bool },
    #[error("update: {0}")]
    Update(String),
    #[error("feed closed")]
    Closed,
}

impl FeedError {
    pub fn fetch(err: impl std::fmt::Display) -> Self { FeedError::Fetch { message: err.to_string(), timed_out: false } }

    pub fn timeout(after_ms: u128) -> Self {
        FeedError::Fetch { message: format!("page fetch timed out after {}ms", after_ms), timed_out: true }
    }

    pub fn subscription(err: impl std::fmt::Display) -> Self { FeedError::Subscription(err.to_string()) }

    pub fn update(err: impl std::fmt::Display) -> Self { FeedError::Update(err.to_string()) }

    /// The caller must leave the view; retrying will not help.
    pub fn is_terminal(&self) -> bool { matches!(self, FeedError::Unauthenticated | FeedError::Unauthorized(_) | FeedError::Closed) }

    pub fn is_retriable(&self) -> bool { matches!(self, FeedError::Subscription(_) | FeedError::Fetch { .. } | FeedError::Update(_)) }

    pub fn is_timeout(&self) -> bool { matches!(self, FeedError::Fetch { timed_out: true, .. }) }
}

/// Failures reported by a document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cursor not valid for filter {0}")]
    InvalidCursor(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown department: {0}")]
pub struct UnknownDepartment(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_retriable_fetch_error() {
        let e = FeedError::timeout(8000);
        assert!(e.is_retriable());
        assert!(e.is_timeout());
        assert!(!e.is_terminal());
        assert!(!FeedError::fetch(StoreError::Unavailable("down".into())).is_timeout());
    }

    #[test]
    fn auth_errors_are_terminal() {
        assert!(FeedError::Unauthenticated.is_terminal());
        assert!(FeedError::Unauthorized("role".into()).is_terminal());
        assert!(!FeedError::NoScope.is_terminal());
        assert!(!FeedError::NoScope.is_retriable());
        assert!(FeedError::update(StoreError::NotFound("r1".into())).is_retriable());
    }

    #[test]
    fn closed_feed_is_not_worth_retrying() {
        assert!(FeedError::Closed.is_terminal());
        assert!(!FeedError::Closed.is_retriable());
        assert!(!FeedError::Closed.is_timeout());
        assert_eq!(FeedError::Closed.to_string(), "feed closed");
    }
}
