use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification of every failure the sync path can run into.
///
/// Crate-specific errors (`StoreError`, `RemoteError`) map into this so that
/// diagnostics can be grouped the same way regardless of where a failure
/// came from. None of these is ever surfaced to the capturing user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    TransientNetwork,
    /// Remote table lacks a column the client wrote.
    SchemaMismatch,
    /// Remote table or storage bucket does not exist.
    ResourceMissing,
    PermissionDenied,
    /// Local storage bound reached.
    QuotaExceeded,
    SerializationError,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::SchemaMismatch => "schema_mismatch",
            Self::ResourceMissing => "resource_missing",
            Self::PermissionDenied => "permission_denied",
            Self::QuotaExceeded => "quota_exceeded",
            Self::SerializationError => "serialization_error",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
