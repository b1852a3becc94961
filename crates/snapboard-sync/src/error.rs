use snapboard_remote::RemoteError;
use thiserror::Error;

/// Errors surfaced to callers of [`SyncHandle`](crate::SyncHandle).
///
/// Only destructive actions report remote failures; everything else
/// degrades silently and logs.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Action failed, check your connection")]
    ActionFailed(#[source] RemoteError),

    #[error("Sync engine is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("Caption service not configured")]
    Unavailable,

    #[error("Caption request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Caption service answered {0}")]
    Status(u16),

    #[error("Caption service returned an empty caption")]
    Empty,
}
