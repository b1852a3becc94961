//! In-process backend.
//!
//! Clones share one table, one bucket and one push channel, so several sync
//! engines built on clones behave like several devices on the same board.
//! [`Faults`] switch on the failure modes a real deployment shows: missing
//! table, drifted columns, missing bucket, no network, read-only policies.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;

use snapboard_shared::{ImageFormat, PhotoId, PhotoPatch};

use crate::error::{RemoteError, RemoteErrorKind};
use crate::repository::{object_path, ChangeEvent, PhotoRepository};
use crate::row::{NewPhotoRow, PatchRow, PhotoRow};

/// Failure modes to simulate.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub table_missing: bool,
    pub bucket_missing: bool,
    /// Every call fails as if the network were down.
    pub offline: bool,
    /// Writes are rejected by row-level policies.
    pub read_only: bool,
    /// Columns the table does not have.
    pub missing_columns: HashSet<&'static str>,
}

impl Faults {
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    pub fn missing_columns(columns: &[&'static str]) -> Self {
        Self {
            missing_columns: columns.iter().copied().collect(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Backend {
    // insertion order
    rows: Vec<PhotoRow>,
    objects: HashMap<String, Vec<u8>>,
    faults: Faults,
}

#[derive(Clone)]
pub struct MemoryRepository {
    backend: Arc<Mutex<Backend>>,
    events: broadcast::Sender<ChangeEvent>,
    scope: String,
}

impl MemoryRepository {
    pub fn new(scope: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            events,
            scope: scope.into(),
        }
    }

    pub fn with_faults(scope: impl Into<String>, faults: Faults) -> Self {
        let repo = Self::new(scope);
        repo.set_faults(faults);
        repo
    }

    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    pub fn faults(&self) -> Faults {
        self.lock().faults.clone()
    }

    /// Snapshot of every row, in insertion order.
    pub fn rows(&self) -> Vec<PhotoRow> {
        self.lock().rows.clone()
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(snapboard_shared::constants::DEFAULT_SCOPE)
    }
}

fn check_table(faults: &Faults) -> Result<(), RemoteError> {
    if faults.offline {
        return Err(RemoteError::transient("network unreachable"));
    }
    if faults.table_missing {
        return Err(RemoteError::new(
            RemoteErrorKind::TableNotFound,
            "relation \"public.photos\" does not exist",
        ));
    }
    Ok(())
}

fn check_write(faults: &Faults, columns: &[&'static str]) -> Result<(), RemoteError> {
    check_table(faults)?;
    if let Some(missing) = columns.iter().find(|c| faults.missing_columns.contains(*c)) {
        return Err(RemoteError::new(
            RemoteErrorKind::ColumnNotFound,
            format!("column \"{}\" of relation \"photos\" does not exist", missing),
        ));
    }
    if faults.read_only {
        return Err(RemoteError::new(
            RemoteErrorKind::PermissionDenied,
            "new row violates row-level security policy",
        ));
    }
    Ok(())
}

fn check_bucket(faults: &Faults) -> Result<(), RemoteError> {
    if faults.offline {
        return Err(RemoteError::transient("network unreachable"));
    }
    if faults.bucket_missing {
        return Err(RemoteError::new(
            RemoteErrorKind::StorageUnavailable,
            "Bucket not found",
        ));
    }
    Ok(())
}

#[async_trait]
impl PhotoRepository for MemoryRepository {
    async fn insert(&self, row: &NewPhotoRow) -> Result<(), RemoteError> {
        let stored = {
            let mut backend = self.lock();
            check_write(&backend.faults, &row.columns())?;

            if backend.rows.iter().any(|r| r.id == row.id) {
                return Err(RemoteError::transient(format!(
                    "duplicate key value violates unique constraint (id={})",
                    row.id
                )));
            }

            let stored = PhotoRow::from_new(row, Utc::now());
            backend.rows.push(stored.clone());
            stored
        };

        debug!(id = %row.id, "memory insert");
        self.publish(ChangeEvent::Inserted(stored));
        Ok(())
    }

    async fn update(&self, id: PhotoId, patch: &PhotoPatch) -> Result<(), RemoteError> {
        let updated = {
            let mut backend = self.lock();
            check_write(&backend.faults, &PatchRow::from(patch).columns())?;

            backend.rows.iter_mut().find(|r| r.id == id).map(|row| {
                row.apply_patch(patch);
                row.clone()
            })
        };

        if let Some(row) = updated {
            self.publish(ChangeEvent::Updated(row));
        }
        Ok(())
    }

    async fn delete(&self, id: PhotoId) -> Result<(), RemoteError> {
        let removed = {
            let mut backend = self.lock();
            check_write(&backend.faults, &[])?;
            let before = backend.rows.len();
            backend.rows.retain(|r| r.id != id);
            backend.rows.len() != before
        };

        if removed {
            self.publish(ChangeEvent::Deleted(id));
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), RemoteError> {
        let ids: Vec<PhotoId> = {
            let mut backend = self.lock();
            check_write(&backend.faults, &[])?;
            backend.rows.drain(..).map(|r| r.id).collect()
        };

        for id in ids {
            self.publish(ChangeEvent::Deleted(id));
        }
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<PhotoRow>, RemoteError> {
        let backend = self.lock();
        check_table(&backend.faults)?;

        // stable sort keeps later inserts first on equal created_at
        let mut rows: Vec<PhotoRow> = backend.rows.iter().rev().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ChangeEvent>> {
        Some(self.events.subscribe())
    }

    async fn upload_image(
        &self,
        id: PhotoId,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<String, RemoteError> {
        let key = object_path(&self.scope, id, format);
        let mut backend = self.lock();
        check_bucket(&backend.faults)?;
        if backend.faults.read_only {
            return Err(RemoteError::new(
                RemoteErrorKind::PermissionDenied,
                "upload rejected by bucket policy",
            ));
        }

        backend.objects.insert(key.clone(), bytes.to_vec());
        Ok(self.public_url(&key))
    }

    async fn delete_image(&self, id: PhotoId, format: ImageFormat) -> Result<(), RemoteError> {
        let key = object_path(&self.scope, id, format);
        let mut backend = self.lock();
        check_bucket(&backend.faults)?;
        backend.objects.remove(&key);
        Ok(())
    }

    async fn delete_all_images(&self) -> Result<(), RemoteError> {
        let prefix = format!("{}/", self.scope);
        let mut backend = self.lock();
        check_bucket(&backend.faults)?;
        backend.objects.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }
}
