/// Application name
pub const APP_NAME: &str = "Snapboard";

/// Key under which the whole local mirror is persisted
pub const MIRROR_KEY: &str = "snapboard.photos";

/// Maximum number of records retained by the local mirror
pub const DEFAULT_MIRROR_CAPACITY: usize = 50;

/// Upper bound on the serialized mirror in bytes (4 MiB, roughly a browser quota)
pub const DEFAULT_MIRROR_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Polling interval of the consistency backstop in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Number of rows requested from the remote table per fetch
pub const DEFAULT_FETCH_LIMIT: u32 = 50;

/// Retention window in hours, for boards configured to expire photos
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Captions longer than this are cut down to this many words
pub const MAX_CAPTION_WORDS: usize = 6;

/// Caption shown while the capture pipeline is still running
pub const PENDING_CAPTION: &str = "Developing...";

/// Caption used when the caption service fails
pub const FALLBACK_CAPTION: &str = "A moment worth keeping";

/// Display format of the `date` field (e.g. "October 18, 2026")
pub const DATE_FORMAT: &str = "%B %-d, %Y";

/// Default object storage bucket and visibility scope
pub const DEFAULT_BUCKET: &str = "photos";
pub const DEFAULT_SCOPE: &str = "public";

/// Remote table name
pub const PHOTOS_TABLE: &str = "photos";
