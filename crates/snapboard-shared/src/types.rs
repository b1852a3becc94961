use std::cmp::Ordering;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DATE_FORMAT, PENDING_CAPTION};

// Photo identity, assigned on the capturing device before any network call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PhotoId(pub Uuid);

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PhotoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the image of a photo lives.
///
/// Serialized as a single string: inline images are `data:` URLs, anything
/// else is a public URL in remote object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageLocation {
    Inline(String),
    Remote(String),
}

impl ImageLocation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inline(s) | Self::Remote(s) => s,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

impl From<String> for ImageLocation {
    fn from(s: String) -> Self {
        if s.starts_with("data:") {
            Self::Inline(s)
        } else {
            Self::Remote(s)
        }
    }
}

impl From<ImageLocation> for String {
    fn from(location: ImageLocation) -> Self {
        match location {
            ImageLocation::Inline(s) | ImageLocation::Remote(s) => s,
        }
    }
}

/// A photo pinned to the board.
///
/// `rotation`, `z_index`, `x` and `y` only drive presentation. `timestamp`
/// orders the board (newest first); records without one are legacy data
/// that sorts last and never expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRecord {
    pub id: PhotoId,
    pub image: ImageLocation,
    pub caption: String,
    pub date: String,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub z_index: i64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
}

impl PhotoRecord {
    /// Build a freshly captured record with a new id, the capture instant and
    /// a placeholder caption. Scatter hints are derived from the id so the
    /// same photo lands on the same spot on every device.
    pub fn capture(image: ImageLocation, taken_at: DateTime<Utc>) -> Self {
        // persisted as epoch millis, so keep no finer precision in memory
        let taken_at = Utc
            .timestamp_millis_opt(taken_at.timestamp_millis())
            .single()
            .unwrap_or(taken_at);
        let id = PhotoId::new();
        let bytes = id.0.as_bytes();

        Self {
            id,
            image,
            caption: PENDING_CAPTION.to_string(),
            date: taken_at.format(DATE_FORMAT).to_string(),
            rotation: (bytes[0] as f64 / 255.0) * 12.0 - 6.0,
            z_index: taken_at.timestamp_millis(),
            x: (bytes[1] % 101) as f64,
            y: (bytes[2] % 101) as f64,
            timestamp: Some(taken_at),
            author_name: None,
            author_bio: None,
            social_handle: None,
        }
    }

    /// Whether the record fell out of the retention window. Records without
    /// a timestamp never expire.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.timestamp.is_some_and(|ts| now - ts > retention)
    }
}

/// Display order: newest first, untimestamped last, ties broken by id.
pub fn newest_first(a: &PhotoRecord, b: &PhotoRecord) -> Ordering {
    b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
}

pub fn sort_newest_first(records: &mut [PhotoRecord]) {
    records.sort_by(newest_first);
}

/// User-editable fields of a photo. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
}

impl PhotoPatch {
    pub fn is_empty(&self) -> bool {
        self.author_name.is_none() && self.author_bio.is_none() && self.social_handle.is_none()
    }

    /// Apply the patch, returning whether anything changed.
    pub fn apply(&self, record: &mut PhotoRecord) -> bool {
        let mut changed = false;
        for (value, slot) in [
            (&self.author_name, &mut record.author_name),
            (&self.author_bio, &mut record.author_bio),
            (&self.social_handle, &mut record.social_handle),
        ] {
            if let Some(value) = value {
                if slot.as_deref() != Some(value.as_str()) {
                    *slot = Some(value.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Fold a later patch into this one; fields set in `newer` win.
    pub fn merge(&mut self, newer: &PhotoPatch) {
        for (value, slot) in [
            (&newer.author_name, &mut self.author_name),
            (&newer.author_bio, &mut self.author_bio),
            (&newer.social_handle, &mut self.social_handle),
        ] {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
    }
}

impl From<&PhotoRecord> for PhotoPatch {
    /// The author fields currently set on `record`.
    fn from(record: &PhotoRecord) -> Self {
        Self {
            author_name: record.author_name.clone(),
            author_bio: record.author_bio.clone(),
            social_handle: record.social_handle.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn image_location_string_form() {
        let inline: ImageLocation = "data:image/png;base64,AAAA".to_string().into();
        assert!(inline.is_inline());

        let remote: ImageLocation = "https://cdn.example/public/a.png".to_string().into();
        assert!(!remote.is_inline());
        assert_eq!(remote.as_str(), "https://cdn.example/public/a.png");
    }

    #[test]
    fn record_serializes_timestamp_as_millis() {
        let record = PhotoRecord::capture(ImageLocation::Remote("u".into()), at(1_700_000_000));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["image"], "u");
        assert!(json.get("zIndex").is_some());
        assert!(json.get("authorBio").is_none());
    }

    #[test]
    fn legacy_record_without_timestamp_parses() {
        let json = r#"{"id":"6f9619ff-8b86-d011-b42d-00cf4fc964ff","image":"u","caption":"c","date":"d"}"#;
        let record: PhotoRecord = serde_json::from_str(json).unwrap();
        assert!(record.timestamp.is_none());
        assert!(!record.is_expired(at(i64::from(u32::MAX)), Duration::hours(24)));
    }

    #[test]
    fn ordering_puts_newest_first_and_legacy_last() {
        let mut old = PhotoRecord::capture(ImageLocation::Remote("a".into()), at(100));
        let new = PhotoRecord::capture(ImageLocation::Remote("b".into()), at(200));
        let mut legacy = PhotoRecord::capture(ImageLocation::Remote("c".into()), at(300));
        legacy.timestamp = None;
        old.caption = "old".into();

        let mut records = vec![legacy.clone(), old.clone(), new.clone()];
        sort_newest_first(&mut records);

        assert_eq!(records[0].id, new.id);
        assert_eq!(records[1].id, old.id);
        assert_eq!(records[2].id, legacy.id);
    }

    #[test]
    fn capture_truncates_to_millis() {
        let precise = at(10) + Duration::nanoseconds(1_234_567);
        let record = PhotoRecord::capture(ImageLocation::Remote("a".into()), precise);
        assert_eq!(record.timestamp, Some(at(10) + Duration::milliseconds(1)));

        let json = serde_json::to_string(&record).unwrap();
        let back: PhotoRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn expiry_respects_window() {
        let record = PhotoRecord::capture(ImageLocation::Remote("a".into()), at(0));
        assert!(!record.is_expired(at(3600), Duration::hours(24)));
        assert!(record.is_expired(at(25 * 3600), Duration::hours(24)));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut record = PhotoRecord::capture(ImageLocation::Remote("a".into()), at(0));
        record.social_handle = Some("@before".into());

        let patch = PhotoPatch {
            author_bio: Some("likes film".into()),
            ..Default::default()
        };
        assert!(patch.apply(&mut record));
        assert_eq!(record.author_bio.as_deref(), Some("likes film"));
        assert_eq!(record.social_handle.as_deref(), Some("@before"));

        // applying the same patch twice is a no-op
        assert!(!patch.apply(&mut record));
        assert!(PhotoPatch::default().is_empty());
    }

    #[test]
    fn later_patch_fields_win() {
        let mut pending = PhotoPatch {
            author_name: Some("Ana".into()),
            author_bio: Some("first".into()),
            ..Default::default()
        };
        pending.merge(&PhotoPatch {
            author_bio: Some("second".into()),
            social_handle: Some("@ana".into()),
            ..Default::default()
        });

        assert_eq!(pending.author_name.as_deref(), Some("Ana"));
        assert_eq!(pending.author_bio.as_deref(), Some("second"));
        assert_eq!(pending.social_handle.as_deref(), Some("@ana"));
    }
}
