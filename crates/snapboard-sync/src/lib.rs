//! # snapboard-sync
//!
//! Keeps one de-duplicated, newest-first photo list alive on top of the
//! local mirror and the remote repository.
//!
//! [`SyncEngine::start`] loads the mirror and publishes it before any network
//! call, then runs a single task that owns all state. Commands from
//! [`SyncHandle`]s, remote push events, mirror notifications, polling ticks
//! and background completions all arrive on one ordered queue, so the
//! interleaving of local and remote changes is deterministic.

pub mod caption;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod pipeline;

pub use caption::{Caption, CaptionGenerator, HttpCaptioner, OfflineCaptioner};
pub use config::SyncConfig;
pub use engine::{EngineState, SyncEngine, SyncHandle};
pub use error::{CaptionError, SyncError};
pub use merge::merge;
pub use pipeline::InsertOutcome;
