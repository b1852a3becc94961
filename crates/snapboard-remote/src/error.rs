use std::fmt;

use snapboard_shared::FailureClass;
use thiserror::Error;

/// What went wrong on the remote side, as far as the sync engine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The `photos` table does not exist.
    TableNotFound,
    /// The table exists but lacks a column that was written.
    ColumnNotFound,
    PermissionDenied,
    /// The storage bucket does not exist or refuses uploads.
    StorageUnavailable,
    /// Anything else; worth retrying on the next cycle.
    Transient,
}

impl RemoteErrorKind {
    /// Map a PostgreSQL / PostgREST error code.
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "42P01" | "PGRST205" => Some(Self::TableNotFound),
            "42703" | "PGRST204" => Some(Self::ColumnNotFound),
            "42501" => Some(Self::PermissionDenied),
            _ => None,
        }
    }

    /// Fallback mapping when only the HTTP status is known.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::PermissionDenied,
            _ => Self::Transient,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::TableNotFound | Self::StorageUnavailable => FailureClass::ResourceMissing,
            Self::ColumnNotFound => FailureClass::SchemaMismatch,
            Self::PermissionDenied => FailureClass::PermissionDenied,
            Self::Transient => FailureClass::TransientNetwork,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TableNotFound => "table not found",
            Self::ColumnNotFound => "column not found",
            Self::PermissionDenied => "permission denied",
            Self::StorageUnavailable => "storage unavailable",
            Self::Transient => "transient error",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn is(&self, kind: RemoteErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        let kind = e
            .status()
            .map(|s| RemoteErrorKind::from_status(s.as_u16()))
            .unwrap_or(RemoteErrorKind::Transient);
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pg_codes_map_to_kinds() {
        assert_eq!(RemoteErrorKind::from_pg_code("42P01"), Some(RemoteErrorKind::TableNotFound));
        assert_eq!(RemoteErrorKind::from_pg_code("PGRST205"), Some(RemoteErrorKind::TableNotFound));
        assert_eq!(RemoteErrorKind::from_pg_code("42703"), Some(RemoteErrorKind::ColumnNotFound));
        assert_eq!(RemoteErrorKind::from_pg_code("PGRST204"), Some(RemoteErrorKind::ColumnNotFound));
        assert_eq!(RemoteErrorKind::from_pg_code("42501"), Some(RemoteErrorKind::PermissionDenied));
        assert_eq!(RemoteErrorKind::from_pg_code("23505"), None);
    }

    #[test]
    fn kinds_classify() {
        assert_eq!(RemoteErrorKind::ColumnNotFound.class(), FailureClass::SchemaMismatch);
        assert_eq!(RemoteErrorKind::StorageUnavailable.class(), FailureClass::ResourceMissing);
        assert_eq!(RemoteErrorKind::from_status(403), RemoteErrorKind::PermissionDenied);
        assert_eq!(RemoteErrorKind::from_status(503), RemoteErrorKind::Transient);
    }

    #[test]
    fn display_includes_kind() {
        let e = RemoteError::new(RemoteErrorKind::TableNotFound, "relation \"photos\" does not exist");
        assert_eq!(e.to_string(), "table not found: relation \"photos\" does not exist");
    }
}
