//! # snapboard-store
//!
//! Device-local persistence for the photo board, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle with a small key-value
//! API, and the [`LocalMirror`] built on top of it: a bounded, best-effort
//! cache of every photo this device has produced or observed, which keeps
//! working when the remote backend does not.

pub mod database;
pub mod kv;
pub mod migrations;
pub mod mirror;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use mirror::{LocalMirror, MirrorConfig, MirrorEvent};
