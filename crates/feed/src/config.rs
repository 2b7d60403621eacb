use std::time::Duration;

use dcare_core::PAGE_SIZE;

/// Runtime knobs for a feed. Read from `DCARE_*` environment variables;
/// unset or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub page_size: usize,
    pub fetch_timeout: Duration,
    pub queue_cap: usize,
}

impl Default for FeedConfig {
    fn default() -> Self { Self { page_size: PAGE_SIZE, fetch_timeout: Duration::from_millis(8000), queue_cap: 256 } }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let page_size = env_parse::<usize>("DCARE_PAGE_SIZE").filter(|n| *n > 0).unwrap_or(d.page_size);
        let fetch_timeout = env_parse::<u64>("DCARE_FETCH_TIMEOUT_MS").map(Duration::from_millis).unwrap_or(d.fetch_timeout);
        let queue_cap = env_parse::<usize>("DCARE_QUEUE_CAP").filter(|n| *n > 0).unwrap_or(d.queue_cap);
        Self { page_size, fetch_timeout, queue_cap }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> { std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok()) }
