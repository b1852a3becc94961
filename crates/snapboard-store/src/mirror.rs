//! The local mirror: every photo this device has captured or seen on the
//! remote board, persisted under a single key.
//!
//! Durability is best-effort. No mutating call fails: when a write does not
//! fit (quota) or cannot be encoded, the oldest records are dropped until it
//! does, and anything beyond that is logged and swallowed. A single record
//! too large to fit on its own is refused instead, leaving the others alone.
//!
//! Handles are cheap clones sharing one connection and one change notifier,
//! so every consumer in the process sees every mutation.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use snapboard_shared::constants::{DEFAULT_MIRROR_CAPACITY, DEFAULT_MIRROR_MAX_BYTES, MIRROR_KEY};
use snapboard_shared::{newest_first, PhotoId, PhotoPatch, PhotoRecord};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Bounds applied to the mirror.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Maximum number of records kept; the oldest are evicted first.
    pub capacity: usize,
    /// Maximum size of the serialized collection in bytes.
    pub max_bytes: usize,
    /// Records older than this are dropped on load. `None` keeps everything.
    pub retention: Option<Duration>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MIRROR_CAPACITY,
            max_bytes: DEFAULT_MIRROR_MAX_BYTES,
            retention: None,
        }
    }
}

/// Change notification fired after every mutation that altered the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    Upserted(PhotoId),
    Updated(PhotoId),
    Removed(PhotoId),
    /// Records seen on the remote board were written in one batch.
    Absorbed,
    Cleared,
}

/// Persisted form of a record. `shared` marks records known to exist in the
/// remote table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    #[serde(flatten)]
    record: PhotoRecord,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    shared: bool,
}

impl Entry {
    fn local(record: PhotoRecord) -> Self {
        Self { record, shared: false }
    }
}

#[derive(Clone)]
pub struct LocalMirror {
    db: Arc<Mutex<Database>>,
    events: broadcast::Sender<MirrorEvent>,
    config: MirrorConfig,
}

impl LocalMirror {
    pub fn new(db: Database, config: MirrorConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db: Arc::new(Mutex::new(db)),
            events,
            config,
        }
    }

    /// Open a mirror backed by the database at `path`.
    pub fn open_at(path: &Path, config: MirrorConfig) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?, config))
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    /// All known records, newest first. Never fails: a missing or corrupt
    /// collection reads as empty. Expired records are filtered out and the
    /// pruned collection is written back.
    pub fn get_all(&self) -> Vec<PhotoRecord> {
        let db = self.lock();
        let mut entries = load(&db);

        if let Some(retention) = self.config.retention {
            let now = Utc::now();
            let before = entries.len();
            entries.retain(|e| !e.record.is_expired(now, retention));

            if entries.len() != before {
                debug!(expired = before - entries.len(), "pruning expired photos");
                self.store(&db, &mut entries);
            }
        }

        entries.into_iter().map(|e| e.record).collect()
    }

    /// Ids of the records known to exist in the remote table.
    pub fn shared_ids(&self) -> HashSet<PhotoId> {
        let db = self.lock();
        load(&db)
            .into_iter()
            .filter(|e| e.shared)
            .map(|e| e.record.id)
            .collect()
    }

    /// Insert a record unless its id is already known (first write wins).
    /// Returns whether the record was inserted.
    pub fn upsert(&self, record: PhotoRecord) -> bool {
        let id = record.id;
        let entry = Entry::local(record);
        if !self.fits(&entry) {
            return false;
        }

        {
            let db = self.lock();
            let mut entries = load(&db);
            if entries.iter().any(|e| e.record.id == id) {
                return false;
            }

            entries.push(entry);
            sort(&mut entries);
            self.evict_over_capacity(&mut entries);
            self.store(&db, &mut entries);
        }

        self.notify(MirrorEvent::Upserted(id));
        true
    }

    /// Record what the remote board holds. Unknown ids are inserted; known
    /// ones keep their local copy and take the remote author fields. Every
    /// record passed in is marked shared. Returns whether anything visible
    /// changed.
    pub fn absorb(&self, observed: Vec<PhotoRecord>) -> bool {
        if observed.is_empty() {
            return false;
        }

        let changed = {
            let db = self.lock();
            let mut entries = load(&db);
            let mut changed = false;
            let mut dirty = false;

            for record in observed {
                match entries.iter_mut().find(|e| e.record.id == record.id) {
                    Some(slot) => {
                        if PhotoPatch::from(&record).apply(&mut slot.record) {
                            changed = true;
                        }
                        dirty |= !slot.shared;
                        slot.shared = true;
                    }
                    None => {
                        let entry = Entry { record, shared: true };
                        if self.fits(&entry) {
                            entries.push(entry);
                            changed = true;
                        }
                    }
                }
            }

            if changed || dirty {
                sort(&mut entries);
                self.evict_over_capacity(&mut entries);
                self.store(&db, &mut entries);
            }
            changed
        };

        if changed {
            self.notify(MirrorEvent::Absorbed);
        }
        changed
    }

    /// Mark a record as present in the remote table. Not a visible change,
    /// so no event fires.
    pub fn mark_shared(&self, id: PhotoId) -> bool {
        self.modify(id, |slot| {
            if slot.shared {
                return false;
            }
            slot.shared = true;
            true
        })
    }

    /// Overwrite an existing record. Returns false if the id is unknown or
    /// the new version cannot be stored.
    pub fn replace(&self, record: PhotoRecord) -> bool {
        let id = record.id;
        if !self.fits(&Entry::local(record.clone())) {
            return false;
        }
        let replaced = self.modify(id, |slot| {
            if slot.record == record {
                return false;
            }
            slot.record = record;
            true
        });

        if replaced {
            self.notify(MirrorEvent::Updated(id));
        }
        replaced
    }

    /// Apply the user-editable fields of `patch` to an existing record.
    pub fn update(&self, id: PhotoId, patch: &PhotoPatch) -> bool {
        let updated = self.modify(id, |slot| patch.apply(&mut slot.record));
        if updated {
            self.notify(MirrorEvent::Updated(id));
        }
        updated
    }

    pub fn remove(&self, id: PhotoId) -> bool {
        self.remove_all(&[id]) == 1
    }

    /// Remove every listed id in one write. Returns how many were present;
    /// one `Removed` event fires per removed record.
    pub fn remove_all(&self, ids: &[PhotoId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let removed: Vec<PhotoId> = {
            let db = self.lock();
            let (gone, mut kept): (Vec<Entry>, Vec<Entry>) = load(&db)
                .into_iter()
                .partition(|e| ids.contains(&e.record.id));

            if !gone.is_empty() {
                self.store(&db, &mut kept);
            }
            gone.into_iter().map(|e| e.record.id).collect()
        };

        for id in &removed {
            self.notify(MirrorEvent::Removed(*id));
        }
        removed.len()
    }

    /// Empty the store. Returns false if the delete itself failed.
    pub fn clear(&self) -> bool {
        {
            let db = self.lock();
            if let Err(e) = db.delete_value(MIRROR_KEY) {
                warn!(error = %e, class = %e.class(), "failed to clear mirror");
                return false;
            }
        }
        self.notify(MirrorEvent::Cleared);
        true
    }

    fn modify(&self, id: PhotoId, f: impl FnOnce(&mut Entry) -> bool) -> bool {
        let db = self.lock();
        let mut entries = load(&db);
        let Some(slot) = entries.iter_mut().find(|e| e.record.id == id) else {
            return false;
        };

        if !f(slot) {
            return false;
        }
        sort(&mut entries);
        self.store(&db, &mut entries);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, event: MirrorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Whether `entry` could be stored even if it were the only record.
    fn fits(&self, entry: &Entry) -> bool {
        let id = entry.record.id;
        match serde_json::to_string(std::slice::from_ref(entry)) {
            Ok(json) if json.len() <= self.config.max_bytes => true,
            Ok(json) => {
                warn!(
                    id = %id,
                    size = json.len(),
                    max = self.config.max_bytes,
                    "photo too large for the mirror, not persisting"
                );
                false
            }
            Err(e) => {
                warn!(id = %id, error = %e, "failed to encode photo, not persisting");
                false
            }
        }
    }

    fn evict_over_capacity(&self, entries: &mut Vec<Entry>) {
        if entries.len() > self.config.capacity {
            debug!(
                evicted = entries.len() - self.config.capacity,
                capacity = self.config.capacity,
                "mirror over capacity, evicting oldest"
            );
            entries.truncate(self.config.capacity);
        }
    }

    /// Persist `entries`, dropping the oldest until the write succeeds.
    /// On return `entries` holds what was actually kept.
    fn store(&self, db: &Database, entries: &mut Vec<Entry>) {
        loop {
            match write(db, entries.as_slice(), self.config.max_bytes) {
                Ok(()) => return,
                Err(e) if entries.is_empty() => {
                    warn!(error = %e, class = %e.class(), "mirror write failed with nothing left to drop");
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        class = %e.class(),
                        remaining = entries.len() - 1,
                        "mirror write failed, dropping oldest photo"
                    );
                    entries.pop();
                }
            }
        }
    }
}

fn sort(entries: &mut [Entry]) {
    entries.sort_by(|a, b| newest_first(&a.record, &b.record));
}

fn load(db: &Database) -> Vec<Entry> {
    let raw = match db.get_value(MIRROR_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "failed to read mirror, treating as empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<Entry>>(&raw) {
        Ok(mut entries) => {
            sort(&mut entries);
            entries
        }
        Err(e) => {
            warn!(error = %e, "corrupt mirror contents, treating as empty");
            Vec::new()
        }
    }
}

fn write(db: &Database, entries: &[Entry], max_bytes: usize) -> Result<()> {
    let json = serde_json::to_string(entries)?;
    if json.len() > max_bytes {
        return Err(StoreError::QuotaExceeded {
            size: json.len(),
            max: max_bytes,
        });
    }
    db.put_value(MIRROR_KEY, &json)
}
