//! Background halves of the write, delete and clear paths.
//!
//! These run in spawned tasks after the optimistic local effect has already
//! been published. None of them fails the user action: they degrade to a
//! narrower mode (inline image, minimal row, local-only) and log why.

use std::sync::Arc;

use tracing::{debug, info, warn};

use snapboard_remote::{NewPhotoRow, PhotoRepository, RemoteError, RemoteErrorKind};
use snapboard_shared::{ImageFormat, ImageLocation, PhotoId, PhotoRecord};

use crate::caption::{Caption, CaptionGenerator};

/// How far a captured photo made it into the remote table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Every column was written.
    Full,
    /// The table lacked columns; only id, image and caption were written.
    Minimal,
    /// Nothing was written; the photo lives in the local mirror only.
    LocalOnly,
}

impl InsertOutcome {
    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::LocalOnly)
    }
}

/// Caption and upload a captured photo. Returns the record as it should be
/// stored: captioned (or fallback-captioned), pointing at the uploaded image
/// when the upload worked and still inline when it did not.
pub async fn develop(
    repo: &dyn PhotoRepository,
    captioner: &dyn CaptionGenerator,
    mut record: PhotoRecord,
    image: &[u8],
    format: ImageFormat,
) -> PhotoRecord {
    let taken_at = record.timestamp.unwrap_or_else(chrono::Utc::now);
    let caption = match captioner.describe(image, format).await {
        Ok(caption) => caption,
        Err(e) => {
            debug!(id = %record.id, error = %e, "caption unavailable, using fallback");
            Caption::fallback(taken_at)
        }
    };
    record.caption = caption.caption;
    record.date = caption.date;

    match repo.upload_image(record.id, image, format).await {
        Ok(url) => record.image = ImageLocation::Remote(url),
        Err(e) => warn!(
            id = %record.id,
            error = %e,
            class = %e.kind.class(),
            "image upload failed, keeping image inline"
        ),
    }

    record
}

/// Insert the row, retrying with the minimal column set when the table has
/// drifted and giving up quietly when the table does not exist.
pub async fn insert_with_fallback(repo: &dyn PhotoRepository, record: &PhotoRecord) -> InsertOutcome {
    let err = match repo.insert(&NewPhotoRow::full(record)).await {
        Ok(()) => return InsertOutcome::Full,
        Err(e) => e,
    };

    match err.kind {
        RemoteErrorKind::ColumnNotFound => {
            warn!(id = %record.id, error = %err, "remote schema drift, retrying with minimal columns");
            match repo.insert(&NewPhotoRow::minimal(record)).await {
                Ok(()) => InsertOutcome::Minimal,
                Err(e) => {
                    warn!(id = %record.id, error = %e, class = %e.kind.class(), "minimal insert failed");
                    InsertOutcome::LocalOnly
                }
            }
        }
        RemoteErrorKind::TableNotFound => {
            info!(id = %record.id, "remote photo table missing, keeping photo local-only");
            InsertOutcome::LocalOnly
        }
        _ => {
            warn!(id = %record.id, error = %err, class = %err.kind.class(), "remote insert failed");
            InsertOutcome::LocalOnly
        }
    }
}

/// Full capture pipeline after the optimistic publish.
pub async fn develop_and_store(
    repo: Arc<dyn PhotoRepository>,
    captioner: Arc<dyn CaptionGenerator>,
    record: PhotoRecord,
    image: Vec<u8>,
    format: ImageFormat,
    on_developed: impl FnOnce(PhotoRecord),
) -> InsertOutcome {
    let developed = develop(repo.as_ref(), captioner.as_ref(), record, &image, format).await;
    on_developed(developed.clone());
    insert_with_fallback(repo.as_ref(), &developed).await
}

/// Delete one photo's row and image. A missing table means there is
/// nothing to delete.
pub async fn purge_remote(
    repo: &dyn PhotoRepository,
    id: PhotoId,
    image: Option<ImageFormat>,
) -> Result<(), RemoteError> {
    match repo.delete(id).await {
        Ok(()) => {}
        Err(e) if e.is(RemoteErrorKind::TableNotFound) => {
            debug!(id = %id, "remote photo table missing, nothing to delete");
        }
        Err(e) => return Err(e),
    }

    if let Some(format) = image {
        if let Err(e) = repo.delete_image(id, format).await {
            warn!(id = %id, error = %e, class = %e.kind.class(), "failed to delete remote image");
        }
    }
    Ok(())
}

/// Delete every row and every image in scope.
pub async fn purge_all(repo: &dyn PhotoRepository) -> Result<(), RemoteError> {
    match repo.delete_all().await {
        Ok(()) => {}
        Err(e) if e.is(RemoteErrorKind::TableNotFound) => {
            debug!("remote photo table missing, nothing to clear");
        }
        Err(e) => return Err(e),
    }

    if let Err(e) = repo.delete_all_images().await {
        warn!(error = %e, class = %e.kind.class(), "failed to clear remote images");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use snapboard_remote::{Faults, MemoryRepository};
    use snapboard_shared::constants::FALLBACK_CAPTION;

    use crate::caption::OfflineCaptioner;
    use crate::error::CaptionError;

    struct FixedCaptioner(&'static str);

    #[async_trait]
    impl CaptionGenerator for FixedCaptioner {
        async fn describe(&self, _image: &[u8], _format: ImageFormat) -> Result<Caption, CaptionError> {
            Ok(Caption {
                caption: self.0.to_string(),
                date: "Today".to_string(),
            })
        }
    }

    fn captured() -> PhotoRecord {
        PhotoRecord::capture(
            ImageLocation::Inline("data:image/png;base64,AA==".into()),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn develop_uploads_and_captions() {
        let repo = MemoryRepository::default();
        let record = captured();

        let developed = develop(&repo, &FixedCaptioner("Best friends forever"), record.clone(), b"png", ImageFormat::Png).await;

        assert_eq!(developed.id, record.id);
        assert_eq!(developed.caption, "Best friends forever");
        assert_eq!(developed.date, "Today");
        assert_eq!(
            developed.image,
            ImageLocation::Remote(format!("memory://public/{}.png", record.id))
        );
    }

    #[tokio::test]
    async fn develop_degrades_without_bucket_or_captions() {
        let repo = MemoryRepository::with_faults(
            "public",
            Faults {
                bucket_missing: true,
                ..Default::default()
            },
        );
        let record = captured();

        let developed = develop(&repo, &OfflineCaptioner, record.clone(), b"png", ImageFormat::Png).await;

        assert_eq!(developed.caption, FALLBACK_CAPTION);
        assert_eq!(developed.image, record.image);
    }

    #[tokio::test]
    async fn column_drift_falls_back_to_minimal_insert() {
        let repo = MemoryRepository::with_faults("public", Faults::missing_columns(&["timestamp", "z_index"]));
        let mut record = captured();
        record.caption = "Sunday picnic".into();

        assert_eq!(insert_with_fallback(&repo, &record).await, InsertOutcome::Minimal);

        let rows = repo.list_recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, record.id);
        assert_eq!(rows[0].caption.as_deref(), Some("Sunday picnic"));
        assert!(rows[0].timestamp.is_none());
    }

    #[tokio::test]
    async fn missing_table_and_outage_stay_local() {
        let repo = MemoryRepository::with_faults(
            "public",
            Faults {
                table_missing: true,
                ..Default::default()
            },
        );
        assert_eq!(insert_with_fallback(&repo, &captured()).await, InsertOutcome::LocalOnly);

        repo.set_faults(Faults::offline());
        assert_eq!(insert_with_fallback(&repo, &captured()).await, InsertOutcome::LocalOnly);
        assert!(repo.rows().is_empty());
    }

    #[tokio::test]
    async fn purge_tolerates_missing_table_but_reports_outage() {
        let repo = MemoryRepository::with_faults(
            "public",
            Faults {
                table_missing: true,
                ..Default::default()
            },
        );
        assert!(purge_remote(&repo, PhotoId::new(), None).await.is_ok());
        assert!(purge_all(&repo).await.is_ok());

        repo.set_faults(Faults::offline());
        let err = purge_all(&repo).await.unwrap_err();
        assert!(err.is(RemoteErrorKind::Transient));
    }

    #[tokio::test]
    async fn purge_removes_row_and_image() {
        let repo = MemoryRepository::default();
        let record = develop(&repo, &OfflineCaptioner, captured(), b"png", ImageFormat::Png).await;
        insert_with_fallback(&repo, &record).await;
        assert_eq!(repo.object_keys().len(), 1);

        purge_remote(&repo, record.id, Some(ImageFormat::Png)).await.unwrap();
        assert!(repo.rows().is_empty());
        assert!(repo.object_keys().is_empty());
    }
}
