//! Daemon configuration loaded from environment variables.
//!
//! Every setting has a default so the daemon starts with zero configuration:
//! no remote URL means an in-process backend, no caption URL means fallback
//! captions.

use std::path::PathBuf;
use std::time::Duration;

use snapboard_remote::RestConfig;
use snapboard_shared::constants::{
    DEFAULT_BUCKET, DEFAULT_FETCH_LIMIT, DEFAULT_MIRROR_CAPACITY, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_RETENTION_HOURS, DEFAULT_SCOPE,
};
use snapboard_store::MirrorConfig;
use snapboard_sync::SyncConfig;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Base URL of the remote table and storage APIs.
    /// Env: `SNAPBOARD_REMOTE_URL`
    /// Default: unset (in-process backend).
    pub remote_url: Option<String>,

    /// Anonymous API key sent with every remote request.
    /// Env: `SNAPBOARD_API_KEY`
    pub api_key: String,

    /// Env: `SNAPBOARD_BUCKET`
    /// Default: `photos`
    pub bucket: String,

    /// Env: `SNAPBOARD_SCOPE`
    /// Default: `public`
    pub scope: String,

    /// Env: `SNAPBOARD_CAPTION_URL`
    /// Default: unset (fallback captions only).
    pub caption_url: Option<String>,

    /// Env: `SNAPBOARD_DB_PATH`
    /// Default: unset (platform data directory).
    pub db_path: Option<PathBuf>,

    /// Env: `SNAPBOARD_POLL_SECS`
    /// Default: `5`. Zero is rejected.
    pub poll_interval: Duration,

    /// Env: `SNAPBOARD_MIRROR_CAP`
    /// Default: `50`
    pub mirror_capacity: usize,

    /// Photos older than this are hidden and pruned.
    /// Env: `SNAPBOARD_RETENTION_HOURS` (`0` disables)
    /// Default: unset (keep everything).
    pub retention: Option<chrono::Duration>,

    /// Env: `SNAPBOARD_FETCH_LIMIT`
    /// Default: `50`
    pub fetch_limit: u32,

    /// Per-request timeout for remote and caption calls.
    /// Env: `SNAPBOARD_REQUEST_TIMEOUT_SECS`
    /// Default: unset (client default).
    pub request_timeout: Option<Duration>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: String::new(),
            bucket: DEFAULT_BUCKET.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            caption_url: None,
            db_path: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            mirror_capacity: DEFAULT_MIRROR_CAPACITY,
            retention: None,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            request_timeout: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("SNAPBOARD_REMOTE_URL").filter(|v| !v.is_empty()) {
            config.remote_url = Some(url);
        }
        if let Some(key) = var("SNAPBOARD_API_KEY") {
            config.api_key = key;
        }
        if let Some(bucket) = var("SNAPBOARD_BUCKET").filter(|v| !v.is_empty()) {
            config.bucket = bucket;
        }
        if let Some(scope) = var("SNAPBOARD_SCOPE").filter(|v| !v.is_empty()) {
            config.scope = scope;
        }
        if let Some(url) = var("SNAPBOARD_CAPTION_URL").filter(|v| !v.is_empty()) {
            config.caption_url = Some(url);
        }
        if let Some(path) = var("SNAPBOARD_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = var("SNAPBOARD_POLL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid SNAPBOARD_POLL_SECS, using default"),
            }
        }

        if let Some(val) = var("SNAPBOARD_MIRROR_CAP") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.mirror_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid SNAPBOARD_MIRROR_CAP, using default"),
            }
        }

        if let Some(val) = var("SNAPBOARD_RETENTION_HOURS") {
            config.retention = match val.parse::<i64>() {
                Ok(0) => None,
                Ok(hours) if hours > 0 => Some(chrono::Duration::hours(hours)),
                _ => {
                    tracing::warn!(
                        value = %val,
                        default = DEFAULT_RETENTION_HOURS,
                        "Invalid SNAPBOARD_RETENTION_HOURS, using default window"
                    );
                    Some(chrono::Duration::hours(DEFAULT_RETENTION_HOURS))
                }
            };
        }

        if let Some(val) = var("SNAPBOARD_FETCH_LIMIT") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.fetch_limit = n,
                _ => tracing::warn!(value = %val, "Invalid SNAPBOARD_FETCH_LIMIT, using default"),
            }
        }

        if let Some(val) = var("SNAPBOARD_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Some(Duration::from_secs(secs)),
                _ => tracing::warn!(value = %val, "Invalid SNAPBOARD_REQUEST_TIMEOUT_SECS, ignoring"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
            fetch_limit: self.fetch_limit,
            retention: self.retention,
        }
    }

    pub fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            capacity: self.mirror_capacity,
            retention: self.retention,
            ..MirrorConfig::default()
        }
    }

    /// Settings for the HTTP backend, or `None` to run on the in-process one.
    pub fn rest_config(&self) -> Option<RestConfig> {
        let url = self.remote_url.as_ref()?;
        let mut rest = RestConfig::new(url.clone(), self.api_key.clone());
        rest.bucket = self.bucket.clone();
        rest.scope = self.scope.clone();
        rest.timeout = self.request_timeout;
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> DaemonConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert!(config.remote_url.is_none());
        assert!(config.rest_config().is_none());
        assert_eq!(config.bucket, "photos");
        assert_eq!(config.scope, "public");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.mirror_capacity, 50);
        assert_eq!(config.fetch_limit, 50);
        assert!(config.retention.is_none());
    }

    #[test]
    fn test_remote_settings() {
        let config = load(&[
            ("SNAPBOARD_REMOTE_URL", "https://board.example"),
            ("SNAPBOARD_API_KEY", "anon"),
            ("SNAPBOARD_SCOPE", "party"),
            ("SNAPBOARD_REQUEST_TIMEOUT_SECS", "10"),
        ]);
        let rest = config.rest_config().unwrap();
        assert_eq!(rest.base_url, "https://board.example");
        assert_eq!(rest.api_key, "anon");
        assert_eq!(rest.bucket, "photos");
        assert_eq!(rest.scope, "party");
        assert_eq!(rest.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("SNAPBOARD_POLL_SECS", "0"),
            ("SNAPBOARD_MIRROR_CAP", "lots"),
            ("SNAPBOARD_FETCH_LIMIT", "-1"),
            ("SNAPBOARD_RETENTION_HOURS", "soon"),
        ]);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.mirror_capacity, 50);
        assert_eq!(config.fetch_limit, 50);
        assert_eq!(config.retention, Some(chrono::Duration::hours(24)));
    }

    #[test]
    fn test_retention_feeds_both_layers() {
        let config = load(&[("SNAPBOARD_RETENTION_HOURS", "6"), ("SNAPBOARD_MIRROR_CAP", "10")]);
        assert_eq!(config.sync_config().retention, Some(chrono::Duration::hours(6)));
        assert_eq!(config.mirror_config().retention, Some(chrono::Duration::hours(6)));
        assert_eq!(config.mirror_config().capacity, 10);

        assert!(load(&[("SNAPBOARD_RETENTION_HOURS", "0")]).retention.is_none());
    }
}
