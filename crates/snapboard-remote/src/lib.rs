//! # snapboard-remote
//!
//! The shared photo board as seen from one device: a `photos` table plus a
//! public object storage bucket, behind the [`PhotoRepository`] trait.
//!
//! Backend error codes are turned into [`RemoteErrorKind`] exactly once, in
//! this crate, so callers only ever branch on the typed kind.

pub mod error;
pub mod memory;
pub mod repository;
pub mod rest;
pub mod row;

pub use error::{RemoteError, RemoteErrorKind};
pub use memory::{Faults, MemoryRepository};
pub use repository::{object_path, ChangeEvent, PhotoRepository};
pub use rest::{RestConfig, RestRepository};
pub use row::{NewPhotoRow, PhotoRow};
