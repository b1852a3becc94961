//! Row shapes of the remote `photos` table.
//!
//! The table has drifted between deployments, so every column beyond
//! `id` and `image_url` is optional when reading, and inserts only send the
//! columns they carry.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use snapboard_shared::constants::DATE_FORMAT;
use snapboard_shared::{ImageLocation, PhotoId, PhotoPatch, PhotoRecord};

/// A row as returned by `list_recent` and push events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoRow {
    pub id: PhotoId,
    pub image_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default)]
    pub z_index: Option<i64>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    /// Capture instant in epoch milliseconds, as set by the capturing device.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Server-assigned insert time.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub social_handle: Option<String>,
}

impl PhotoRow {
    /// The instant the row sorts by: the device timestamp when present,
    /// otherwise the server insert time.
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .or(self.created_at)
    }

    pub fn into_record(self) -> PhotoRecord {
        let timestamp = self.taken_at();
        let date = self.date.unwrap_or_else(|| {
            timestamp
                .map(|ts| ts.format(DATE_FORMAT).to_string())
                .unwrap_or_default()
        });

        PhotoRecord {
            id: self.id,
            image: ImageLocation::from(self.image_url),
            caption: self.caption.unwrap_or_default(),
            date,
            rotation: self.rotation.unwrap_or_default(),
            z_index: self.z_index.unwrap_or_default(),
            x: self.x.unwrap_or_default(),
            y: self.y.unwrap_or_default(),
            timestamp,
            author_name: self.author_name,
            author_bio: self.bio,
            social_handle: self.social_handle,
        }
    }

    /// Build the row a full insert of `record` would produce.
    pub fn from_new(row: &NewPhotoRow, created_at: DateTime<Utc>) -> Self {
        Self {
            id: row.id,
            image_url: row.image_url.clone(),
            caption: Some(row.caption.clone()),
            date: row.date.clone(),
            rotation: row.rotation,
            z_index: row.z_index,
            x: row.x,
            y: row.y,
            timestamp: row.timestamp,
            created_at: Some(created_at),
            author_name: row.author_name.clone(),
            bio: row.bio.clone(),
            social_handle: row.social_handle.clone(),
        }
    }

    pub fn apply_patch(&mut self, patch: &PhotoPatch) {
        if let Some(name) = &patch.author_name {
            self.author_name = Some(name.clone());
        }
        if let Some(bio) = &patch.author_bio {
            self.bio = Some(bio.clone());
        }
        if let Some(handle) = &patch.social_handle {
            self.social_handle = Some(handle.clone());
        }
    }
}

/// Insert payload. Absent columns are not sent at all.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewPhotoRow {
    pub id: PhotoId,
    pub image_url: String,
    pub caption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<String>,
}

impl NewPhotoRow {
    /// Every column the record has a value for.
    pub fn full(record: &PhotoRecord) -> Self {
        Self {
            date: Some(record.date.clone()),
            rotation: Some(record.rotation),
            z_index: Some(record.z_index),
            x: Some(record.x),
            y: Some(record.y),
            timestamp: record.timestamp.map(|ts| ts.timestamp_millis()),
            author_name: record.author_name.clone(),
            bio: record.author_bio.clone(),
            social_handle: record.social_handle.clone(),
            ..Self::minimal(record)
        }
    }

    /// Only the columns every deployment of the table has had.
    pub fn minimal(record: &PhotoRecord) -> Self {
        Self {
            id: record.id,
            image_url: record.image.as_str().to_string(),
            caption: record.caption.clone(),
            date: None,
            rotation: None,
            z_index: None,
            x: None,
            y: None,
            timestamp: None,
            author_name: None,
            bio: None,
            social_handle: None,
        }
    }

    /// Names of the columns this payload writes.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["id", "image_url", "caption"];
        let optional = [
            ("date", self.date.is_some()),
            ("rotation", self.rotation.is_some()),
            ("z_index", self.z_index.is_some()),
            ("x", self.x.is_some()),
            ("y", self.y.is_some()),
            ("timestamp", self.timestamp.is_some()),
            ("author_name", self.author_name.is_some()),
            ("bio", self.bio.is_some()),
            ("social_handle", self.social_handle.is_some()),
        ];
        columns.extend(optional.iter().filter(|(_, set)| *set).map(|(name, _)| *name));
        columns
    }
}

/// Update payload for the user-editable columns.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchRow<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social_handle: Option<&'a str>,
}

impl<'a> From<&'a PhotoPatch> for PatchRow<'a> {
    fn from(patch: &'a PhotoPatch) -> Self {
        Self {
            author_name: patch.author_name.as_deref(),
            bio: patch.author_bio.as_deref(),
            social_handle: patch.social_handle.as_deref(),
        }
    }
}

impl PatchRow<'_> {
    pub fn columns(&self) -> Vec<&'static str> {
        [
            ("author_name", self.author_name.is_some()),
            ("bio", self.bio.is_some()),
            ("social_handle", self.social_handle.is_some()),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PhotoRecord {
        let mut record = PhotoRecord::capture(
            ImageLocation::Remote("https://cdn/public/a.png".into()),
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        record.caption = "Golden hour smiles".into();
        record.author_bio = Some("film nerd".into());
        record
    }

    #[test]
    fn minimal_insert_sends_three_columns() {
        let row = NewPhotoRow::minimal(&record());
        let json = serde_json::to_value(&row).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();

        assert_eq!(keys.len(), 3);
        assert_eq!(row.columns(), vec!["id", "image_url", "caption"]);
    }

    #[test]
    fn full_insert_maps_bio_column() {
        let row = NewPhotoRow::full(&record());
        let json = serde_json::to_value(&row).unwrap();

        assert_eq!(json["bio"], "film nerd");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert!(json.get("social_handle").is_none());
        assert!(row.columns().contains(&"bio"));
    }

    #[test]
    fn row_without_timestamp_uses_created_at() {
        let json = r#"{
            "id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff",
            "image_url": "https://cdn/public/x.jpg",
            "caption": "hello",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }"#;
        let row: PhotoRow = serde_json::from_str(json).unwrap();
        let record = row.into_record();

        assert_eq!(
            record.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + chrono::Duration::microseconds(123_456))
        );
        assert_eq!(record.date, "May 1, 2024");
        assert!(!record.image.is_inline());
    }

    #[test]
    fn full_row_round_trips_into_same_record() {
        let original = record();
        let row = PhotoRow::from_new(&NewPhotoRow::full(&original), Utc::now());
        assert_eq!(row.into_record(), original);
    }

    #[test]
    fn patch_row_only_lists_set_columns() {
        let patch = PhotoPatch {
            social_handle: Some("@snap".into()),
            ..Default::default()
        };
        let row = PatchRow::from(&patch);
        assert_eq!(row.columns(), vec!["social_handle"]);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"social_handle":"@snap"}"#);
    }
}
