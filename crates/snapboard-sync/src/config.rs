use std::time::Duration;

use snapboard_shared::constants::{DEFAULT_FETCH_LIMIT, DEFAULT_POLL_INTERVAL_SECS};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often the remote table is re-fetched regardless of push events.
    /// Must be non-zero.
    pub poll_interval: Duration,
    /// Rows requested per fetch.
    pub fetch_limit: u32,
    /// Photos older than this are hidden from the board. `None` keeps all.
    pub retention: Option<chrono::Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            retention: None,
        }
    }
}
