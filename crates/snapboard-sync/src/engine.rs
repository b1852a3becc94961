//! The sync engine task and the handles that talk to it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use snapboard_remote::{ChangeEvent, PhotoRepository, PhotoRow, RemoteError, RemoteErrorKind};
use snapboard_shared::image::to_data_url;
use snapboard_shared::{ImageFormat, ImageLocation, PhotoId, PhotoPatch, PhotoRecord};
use snapboard_store::{LocalMirror, MirrorEvent};

use crate::caption::CaptionGenerator;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::merge::{merge, without_expired};
use crate::pipeline::{self, InsertOutcome};

/// Lifecycle of the engine, observable through [`SyncHandle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Mirror loaded and published, no fetch issued yet.
    Init,
    /// A fetch of the remote table is in flight.
    Fetching,
    /// Remote snapshot loaded; push events are applied as they arrive.
    Live,
    Closed,
}

type View = Arc<Vec<PhotoRecord>>;

enum Message {
    Capture {
        image: Vec<u8>,
        reply: oneshot::Sender<PhotoRecord>,
    },
    Update {
        id: PhotoId,
        patch: PhotoPatch,
        reply: oneshot::Sender<bool>,
    },
    Delete {
        id: PhotoId,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Refresh,
    Shutdown,
    Fetched {
        generation: u64,
        result: Result<Vec<PhotoRow>, RemoteError>,
    },
    Remote(ChangeEvent),
    Local(MirrorEvent),
    LocalLagged,
    Developed(PhotoRecord),
    Stored {
        id: PhotoId,
        format: ImageFormat,
        outcome: InsertOutcome,
    },
    Pushed {
        id: PhotoId,
        patch: PhotoPatch,
        result: Result<(), RemoteError>,
    },
}

/// Owner of the engine task. Dropping it (and every handle) stops the task;
/// [`SyncEngine::shutdown`] also waits for it to finish.
pub struct SyncEngine {
    handle: SyncHandle,
    task: JoinHandle<()>,
}

impl SyncEngine {
    /// Load the mirror, publish it, and start syncing against `repo`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        mirror: LocalMirror,
        repo: Arc<dyn PhotoRepository>,
        captioner: Arc<dyn CaptionGenerator>,
        config: SyncConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut forwarders = vec![forward(mirror.subscribe(), tx.clone(), Message::Local, || {
            Message::LocalLagged
        })];
        match repo.subscribe() {
            Some(events) => forwarders.push(forward(events, tx.clone(), Message::Remote, || Message::Refresh)),
            None => debug!("remote has no push channel, relying on polling"),
        }

        let mut core = Core::new(mirror, repo, captioner, config, tx.clone());

        let (view_tx, view_rx) = watch::channel(Arc::new(core.compose()));
        let (state_tx, state_rx) = watch::channel(EngineState::Init);
        core.view = Some(view_tx);
        core.state = Some(state_tx);

        let task = tokio::spawn(core.run(rx, forwarders));

        let handle = SyncHandle {
            inner: Arc::new(HandleInner {
                tx,
                view: view_rx,
                state: state_rx,
            }),
        };

        Self { handle, task }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop the engine and wait for its task to exit. Background uploads
    /// still running keep going but their results are dropped.
    pub async fn shutdown(self) {
        let _ = self.handle.inner.tx.send(Message::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync engine task failed");
        }
    }
}

/// Cheap, cloneable access to a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    tx: mpsc::UnboundedSender<Message>,
    view: watch::Receiver<View>,
    state: watch::Receiver<EngineState>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

impl SyncHandle {
    /// Capture a photo. Returns once the photo is in the published view
    /// with a placeholder caption; captioning, upload and the remote insert
    /// continue in the background.
    pub async fn capture(&self, image: Vec<u8>) -> Result<PhotoRecord, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Capture { image, reply })?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Edit the author fields of a photo. Returns whether anything changed
    /// locally; the remote update is best-effort.
    pub async fn update(&self, id: PhotoId, patch: PhotoPatch) -> Result<bool, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Update { id, patch, reply })?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Remove a photo. The local removal always happens; an error means the
    /// remote row or image may still exist.
    pub async fn delete(&self, id: PhotoId) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Delete { id, reply })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Remove every photo, locally and remotely.
    pub async fn clear(&self) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Message::Clear { reply })?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Fetch the remote table now instead of waiting for the next poll.
    pub fn refresh(&self) {
        let _ = self.inner.tx.send(Message::Refresh);
    }

    /// The current view, newest first.
    pub fn photos(&self) -> View {
        self.inner.view.borrow().clone()
    }

    /// Receiver that is notified every time the view changes.
    pub fn subscribe(&self) -> watch::Receiver<View> {
        self.inner.view.clone()
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.clone()
    }

    fn send(&self, msg: Message) -> Result<(), SyncError> {
        self.inner.tx.send(msg).map_err(|_| SyncError::Closed)
    }
}

/// Pump a broadcast channel into the engine queue. A lagged receiver has
/// missed events, so it sends `lagged()` to ask for a full reload instead.
fn forward<T: Clone + Send + 'static>(
    mut events: broadcast::Receiver<T>,
    tx: mpsc::UnboundedSender<Message>,
    wrap: fn(T) -> Message,
    lagged: fn() -> Message,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(event) => wrap(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "change events lagged, reloading");
                    lagged()
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            if tx.send(msg).is_err() {
                return;
            }
        }
    })
}

/// State owned by the engine task.
struct Core {
    mirror: LocalMirror,
    repo: Arc<dyn PhotoRepository>,
    captioner: Arc<dyn CaptionGenerator>,
    config: SyncConfig,
    tx: mpsc::UnboundedSender<Message>,
    view: Option<watch::Sender<View>>,
    state: Option<watch::Sender<EngineState>>,

    /// Mirror contents as of the last load.
    local: Vec<PhotoRecord>,
    /// Last known remote table, patched by push events.
    remote: HashMap<PhotoId, PhotoRecord>,
    /// Captures whose background pipeline has not finished yet, and captures
    /// that fit neither the mirror nor the remote table.
    overlay: HashMap<PhotoId, PhotoRecord>,
    /// Captures whose pipeline has not reported back.
    in_flight: HashSet<PhotoId>,
    /// Ids known to exist in the remote table.
    shared: HashSet<PhotoId>,
    /// Author edits the remote has not confirmed yet.
    unsent: HashMap<PhotoId, PhotoPatch>,
    /// Ids deleted on this device whose remote row may still exist; remote
    /// copies of them are ignored.
    tombstones: HashSet<PhotoId>,
    /// Mirror notifications caused by this task that have not come back yet.
    echoes: usize,
    /// Bumped by delete and clear so fetches issued before them are dropped.
    generation: u64,
    /// `shared` as of when the in-flight fetch was issued.
    fetch_known: HashSet<PhotoId>,
    fetch_in_flight: bool,
    refetch_pending: bool,
}

impl Core {
    fn new(
        mirror: LocalMirror,
        repo: Arc<dyn PhotoRepository>,
        captioner: Arc<dyn CaptionGenerator>,
        config: SyncConfig,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let local = mirror.get_all();
        let shared = mirror.shared_ids();
        debug!(count = local.len(), shared = shared.len(), "loaded local mirror");

        Self {
            mirror,
            repo,
            captioner,
            config,
            tx,
            view: None,
            state: None,
            local,
            remote: HashMap::new(),
            overlay: HashMap::new(),
            in_flight: HashSet::new(),
            shared,
            unsent: HashMap::new(),
            tombstones: HashSet::new(),
            echoes: 0,
            generation: 0,
            fetch_known: HashSet::new(),
            fetch_in_flight: false,
            refetch_pending: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>, forwarders: Vec<JoinHandle<()>>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Message::Shutdown) | None => break,
                    Some(msg) => self.handle(msg),
                },
                _ = poll.tick() => self.fetch(),
            }
        }

        for forwarder in forwarders {
            forwarder.abort();
        }
        self.set_state(EngineState::Closed);
        info!("sync engine closed");
    }

    fn handle(&mut self, msg: Message) {
        match msg {
            Message::Capture { image, reply } => {
                let record = self.capture(image);
                let _ = reply.send(record);
            }
            Message::Update { id, patch, reply } => {
                let _ = reply.send(self.update(id, patch));
            }
            Message::Delete { id, reply } => self.delete(id, reply),
            Message::Clear { reply } => self.clear(reply),
            Message::Refresh => self.fetch(),
            Message::Fetched { generation, result } => self.fetched(generation, result),
            Message::Remote(event) => self.remote_event(event),
            Message::Local(event) => {
                if self.echoes > 0 {
                    // our own write; `local` already reflects it
                    self.echoes -= 1;
                    return;
                }
                debug!(?event, "local mirror changed elsewhere");
                self.reload_local();
                self.publish();
            }
            Message::LocalLagged => {
                self.echoes = 0;
                self.reload_local();
                self.publish();
            }
            Message::Developed(record) => self.developed(record),
            Message::Stored { id, format, outcome } => self.stored(id, format, outcome),
            Message::Pushed { id, patch, result } => self.pushed(id, patch, result),
            Message::Shutdown => {}
        }
    }

    /// Account for a mirror mutation; a notifying one comes back as an echo.
    fn wrote(&mut self, notified: bool) -> bool {
        if notified {
            self.echoes += 1;
        }
        notified
    }

    fn capture(&mut self, image: Vec<u8>) -> PhotoRecord {
        let format = ImageFormat::sniff(&image);
        let record = PhotoRecord::capture(
            ImageLocation::Inline(to_data_url(&image, format)),
            Utc::now(),
        );
        info!(id = %record.id, size = image.len(), "captured photo");

        let upserted = self.mirror.upsert(record.clone());
        if self.wrote(upserted) {
            self.reload_local();
        }
        self.overlay.insert(record.id, record.clone());
        self.in_flight.insert(record.id);
        self.publish();

        let repo = self.repo.clone();
        let captioner = self.captioner.clone();
        let tx = self.tx.clone();
        let pending = record.clone();
        tokio::spawn(async move {
            let id = pending.id;
            let developed_tx = tx.clone();
            let outcome = pipeline::develop_and_store(repo, captioner, pending, image, format, move |developed| {
                let _ = developed_tx.send(Message::Developed(developed));
            })
            .await;
            let _ = tx.send(Message::Stored { id, format, outcome });
        });

        record
    }

    fn developed(&mut self, developed: PhotoRecord) {
        let id = developed.id;
        if self.tombstones.contains(&id) {
            return;
        }

        // keep author fields edited while the pipeline was running
        let record = match self.overlay.get_mut(&id) {
            Some(pending) => {
                pending.caption = developed.caption;
                pending.date = developed.date;
                pending.image = developed.image;
                pending.clone()
            }
            None => developed,
        };
        debug!(id = %id, caption = %record.caption, inline = record.image.is_inline(), "photo developed");

        // an upload may have shrunk a capture the mirror refused earlier
        let written = self.mirror.replace(record.clone()) || self.mirror.upsert(record);
        if self.wrote(written) {
            self.reload_local();
        }
        self.publish();
    }

    fn stored(&mut self, id: PhotoId, format: ImageFormat, outcome: InsertOutcome) {
        self.in_flight.remove(&id);

        if self.tombstones.contains(&id) {
            if outcome.is_shared() {
                // deleted while the insert was in flight
                debug!(id = %id, "purging photo deleted during upload");
                let repo = self.repo.clone();
                tokio::spawn(async move {
                    if let Err(e) = pipeline::purge_remote(repo.as_ref(), id, Some(format)).await {
                        warn!(id = %id, error = %e, class = %e.kind.class(), "failed to purge deleted photo");
                    }
                });
            }
            return;
        }

        let Some(record) = self.overlay.remove(&id) else {
            return;
        };
        debug!(id = %id, ?outcome, "photo stored");

        if outcome.is_shared() {
            self.mirror.mark_shared(id);
            self.shared.insert(id);
            // edits made before the row existed never reached it
            let patch = PhotoPatch::from(&record);
            if !patch.is_empty() {
                self.push_update(id, patch);
            }
            self.remote.insert(id, record);
        } else if !self.local.iter().any(|r| r.id == id) {
            debug!(id = %id, "photo fits neither store, keeping it in memory");
            self.overlay.insert(id, record);
        }
        self.publish();
    }

    fn update(&mut self, id: PhotoId, patch: PhotoPatch) -> bool {
        if patch.is_empty() {
            return false;
        }

        let updated = self.mirror.update(id, &patch);
        let mut changed = self.wrote(updated);
        if let Some(record) = self.overlay.get_mut(&id) {
            changed |= patch.apply(record);
        }
        if let Some(record) = self.remote.get_mut(&id) {
            changed |= patch.apply(record);
        }

        if !changed {
            return false;
        }
        if updated {
            self.reload_local();
        }
        self.publish();

        // a capture still uploading gets the edit once its row exists
        if !self.in_flight.contains(&id) {
            self.push_update(id, patch);
        }
        true
    }

    /// Send `patch` to the remote, keeping it queued until the remote
    /// confirms it.
    fn push_update(&mut self, id: PhotoId, patch: PhotoPatch) {
        self.unsent.entry(id).or_default().merge(&patch);
        self.send_update(id, patch);
    }

    fn send_update(&self, id: PhotoId, patch: PhotoPatch) {
        let repo = self.repo.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = repo.update(id, &patch).await;
            let _ = tx.send(Message::Pushed { id, patch, result });
        });
    }

    fn pushed(&mut self, id: PhotoId, patch: PhotoPatch, result: Result<(), RemoteError>) {
        match result {
            Ok(()) => {
                debug!(id = %id, "remote photo updated");
                // a later edit may have been queued meanwhile
                if self.unsent.get(&id) == Some(&patch) {
                    self.unsent.remove(&id);
                }
            }
            Err(e) if e.is(RemoteErrorKind::TableNotFound) => {
                self.unsent.remove(&id);
            }
            Err(e) => warn!(
                id = %id,
                error = %e,
                class = %e.kind.class(),
                "remote update failed, retrying after the next fetch"
            ),
        }
    }

    fn delete(&mut self, id: PhotoId, reply: oneshot::Sender<Result<(), SyncError>>) {
        let image = self
            .remote
            .get(&id)
            .or_else(|| self.overlay.get(&id))
            .or_else(|| self.local.iter().find(|r| r.id == id))
            .map(|r| r.image.clone());

        self.tombstones.insert(id);
        self.generation += 1;
        self.remote.remove(&id);
        self.overlay.remove(&id);
        self.shared.remove(&id);
        self.unsent.remove(&id);
        let removed = self.mirror.remove(id);
        if self.wrote(removed) {
            self.reload_local();
        }
        self.publish();
        info!(id = %id, "deleted photo");

        // inline images were never uploaded
        let format = match &image {
            Some(ImageLocation::Remote(url)) => Some(ImageFormat::from_location(url)),
            _ => None,
        };

        let repo = self.repo.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = pipeline::purge_remote(repo.as_ref(), id, format).await;
            if let Err(e) = &result {
                warn!(id = %id, error = %e, class = %e.kind.class(), "remote delete failed");
            }
            let _ = tx.send(Message::Refresh);
            let _ = reply.send(result.map_err(SyncError::ActionFailed));
        });
    }

    fn clear(&mut self, reply: oneshot::Sender<Result<(), SyncError>>) {
        let known = self
            .remote
            .keys()
            .chain(self.overlay.keys())
            .chain(self.in_flight.iter())
            .chain(self.shared.iter())
            .copied()
            .chain(self.local.iter().map(|r| r.id))
            .collect::<Vec<_>>();
        self.tombstones.extend(known);
        self.generation += 1;
        self.remote.clear();
        self.overlay.clear();
        self.shared.clear();
        self.unsent.clear();
        let cleared = self.mirror.clear();
        if self.wrote(cleared) {
            self.reload_local();
        }
        self.publish();
        info!("cleared all photos");

        let repo = self.repo.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = pipeline::purge_all(repo.as_ref()).await;
            if let Err(e) = &result {
                warn!(error = %e, class = %e.kind.class(), "remote clear failed");
            }
            let _ = tx.send(Message::Refresh);
            let _ = reply.send(result.map_err(SyncError::ActionFailed));
        });
    }

    fn fetch(&mut self) {
        if self.fetch_in_flight {
            self.refetch_pending = true;
            return;
        }
        self.fetch_in_flight = true;
        self.fetch_known = self.shared.clone();
        self.set_state(EngineState::Fetching);

        let repo = self.repo.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        let limit = self.config.fetch_limit;
        tokio::spawn(async move {
            let result = repo.list_recent(limit).await;
            let _ = tx.send(Message::Fetched { generation, result });
        });
    }

    fn fetched(&mut self, generation: u64, result: Result<Vec<PhotoRow>, RemoteError>) {
        self.fetch_in_flight = false;
        let known = std::mem::take(&mut self.fetch_known);

        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale fetch");
        } else {
            match result {
                Ok(rows) => self.apply_snapshot(rows, known),
                Err(e) if e.is(RemoteErrorKind::TableNotFound) => {
                    debug!("remote photo table missing, running local-only");
                }
                Err(e) => {
                    warn!(error = %e, class = %e.kind.class(), "remote fetch failed, keeping last snapshot");
                }
            }
        }

        self.set_state(EngineState::Live);
        if std::mem::take(&mut self.refetch_pending) {
            self.fetch();
        }
    }

    /// Replace the remote snapshot with a fetched one. `known` is the set of
    /// shared ids as of when the fetch was issued.
    fn apply_snapshot(&mut self, rows: Vec<PhotoRow>, known: HashSet<PhotoId>) {
        let complete = rows.len() < self.config.fetch_limit as usize;
        let listed: HashSet<PhotoId> = rows.iter().map(|row| row.id).collect();
        debug!(count = rows.len(), complete, "remote snapshot fetched");

        if complete {
            // rows confirmed gone need no tombstone
            self.tombstones
                .retain(|id| listed.contains(id) || self.in_flight.contains(id));
        }

        let mut snapshot: HashMap<PhotoId, PhotoRecord> = rows
            .into_iter()
            .filter(|row| !self.tombstones.contains(&row.id))
            .map(|row| (row.id, row.into_record()))
            .collect();
        for (id, patch) in &self.unsent {
            if let Some(record) = snapshot.get_mut(id) {
                patch.apply(record);
            }
        }

        // an incomplete page only speaks for rows at least as new as its oldest
        let oldest = snapshot.values().filter_map(|r| r.timestamp).min();
        let vanished: Vec<PhotoId> = known
            .iter()
            .filter(|id| !listed.contains(*id) && !self.in_flight.contains(*id))
            .filter(|id| {
                complete || {
                    let taken = self
                        .remote
                        .get(*id)
                        .or_else(|| self.local.iter().find(|r| r.id == **id))
                        .and_then(|r| r.timestamp);
                    matches!((taken, oldest), (Some(t), Some(o)) if t >= o)
                }
            })
            .copied()
            .collect();

        // rows stored after the fetch was issued are newer than the snapshot
        for (id, record) in self.remote.drain() {
            if !known.contains(&id) && !listed.contains(&id) {
                snapshot.insert(id, record);
            }
        }

        if !vanished.is_empty() {
            debug!(count = vanished.len(), "photos deleted remotely");
        }
        for id in &vanished {
            self.shared.remove(id);
            self.overlay.remove(id);
        }
        let removed = self.mirror.remove_all(&vanished);
        self.echoes += removed;

        self.shared.extend(snapshot.keys().copied());
        let observed: Vec<PhotoRecord> = snapshot
            .values()
            .filter(|r| !self.overlay.contains_key(&r.id))
            .cloned()
            .collect();
        let absorbed = self.mirror.absorb(observed);
        if self.wrote(absorbed) || removed > 0 {
            self.reload_local();
        }
        self.remote = snapshot;

        // retry edits the remote has not confirmed
        for (id, patch) in &self.unsent {
            if !self.in_flight.contains(id) {
                self.send_update(*id, patch.clone());
            }
        }

        self.publish();
    }

    fn remote_event(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Inserted(row) | ChangeEvent::Updated(row) => {
                if self.tombstones.contains(&row.id) {
                    return;
                }
                debug!(id = %row.id, "remote photo changed");
                let mut record = row.into_record();
                if let Some(patch) = self.unsent.get(&record.id) {
                    patch.apply(&mut record);
                }
                self.shared.insert(record.id);
                if !self.overlay.contains_key(&record.id) {
                    let absorbed = self.mirror.absorb(vec![record.clone()]);
                    if self.wrote(absorbed) {
                        self.reload_local();
                    }
                }
                self.remote.insert(record.id, record);
            }
            ChangeEvent::Deleted(id) => {
                debug!(id = %id, "remote photo deleted");
                self.remote.remove(&id);
                self.overlay.remove(&id);
                self.shared.remove(&id);
                self.unsent.remove(&id);
                let removed = self.mirror.remove(id);
                if self.wrote(removed) {
                    self.reload_local();
                }
            }
        }
        self.publish();
    }

    fn reload_local(&mut self) {
        self.local = self.mirror.get_all();
    }

    /// The view as it should currently be published.
    fn compose(&self) -> Vec<PhotoRecord> {
        let mut local = self.local.clone();
        for pending in self.overlay.values() {
            match local.iter_mut().find(|r| r.id == pending.id) {
                Some(slot) => *slot = pending.clone(),
                None => local.push(pending.clone()),
            }
        }
        let remote: Vec<PhotoRecord> = self.remote.values().cloned().collect();

        let merged = merge(&remote, &local);
        match self.config.retention {
            Some(retention) => without_expired(merged, Utc::now(), retention),
            None => merged,
        }
    }

    fn publish(&self) {
        let Some(view) = &self.view else {
            return;
        };
        let next = self.compose();
        let changed = view.send_if_modified(|current| {
            if current.as_slice() == next.as_slice() {
                return false;
            }
            *current = Arc::new(next);
            true
        });
        if changed {
            debug!(count = view.borrow().len(), "published view");
        }
    }

    fn set_state(&self, state: EngineState) {
        if let Some(tx) = &self.state {
            tx.send_if_modified(|current| {
                if *current == state || *current == EngineState::Closed {
                    return false;
                }
                *current = state;
                true
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use snapboard_remote::{MemoryRepository, NewPhotoRow};
    use snapboard_store::MirrorConfig;

    use crate::caption::OfflineCaptioner;

    fn start(dir: &tempfile::TempDir, repo: MemoryRepository) -> SyncEngine {
        let mirror = LocalMirror::open_at(&dir.path().join("mirror.db"), MirrorConfig::default()).unwrap();
        let config = SyncConfig {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        SyncEngine::start(mirror, Arc::new(repo), Arc::new(OfflineCaptioner), config)
    }

    fn core(dir: &tempfile::TempDir) -> (Core, mpsc::UnboundedReceiver<Message>) {
        let mirror = LocalMirror::open_at(&dir.path().join("mirror.db"), MirrorConfig::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Core::new(
            mirror,
            Arc::new(MemoryRepository::default()),
            Arc::new(OfflineCaptioner),
            SyncConfig::default(),
            tx,
        );
        (core, rx)
    }

    fn row(record: &PhotoRecord) -> PhotoRow {
        PhotoRow::from_new(&NewPhotoRow::full(record), Utc::now())
    }

    #[tokio::test]
    async fn first_fetch_goes_live() {
        let dir = tempfile::tempdir().unwrap();
        let engine = start(&dir, MemoryRepository::default());
        let mut state = engine.handle().subscribe_state();

        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == EngineState::Live))
            .await
            .unwrap()
            .unwrap();
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = start(&dir, MemoryRepository::default());
        let handle = engine.handle();

        engine.shutdown().await;

        assert_eq!(handle.state(), EngineState::Closed);
        assert!(matches!(handle.capture(vec![1, 2, 3]).await, Err(SyncError::Closed)));
        assert!(matches!(handle.clear().await, Err(SyncError::Closed)));
    }

    #[tokio::test]
    async fn empty_patch_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = start(&dir, MemoryRepository::default());
        let handle = engine.handle();

        let record = handle.capture(vec![0x89, b'P', b'N', b'G']).await.unwrap();
        assert!(!handle.update(record.id, PhotoPatch::default()).await.unwrap());
        assert!(!handle.update(PhotoId::new(), PhotoPatch {
            author_name: Some("nobody".into()),
            ..Default::default()
        })
        .await
        .unwrap());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn tombstone_dropped_once_fetch_confirms_row_gone() {
        let dir = tempfile::tempdir().unwrap();
        let (mut core, _rx) = core(&dir);
        let gone = PhotoId::new();
        let lingering = PhotoRecord::capture(ImageLocation::Remote("memory://public/l.png".into()), Utc::now());

        for id in [gone, lingering.id] {
            let (reply, _) = oneshot::channel();
            core.delete(id, reply);
        }
        assert_eq!(core.tombstones.len(), 2);

        core.fetch_in_flight = true;
        core.fetched(core.generation, Ok(vec![row(&lingering)]));

        assert_eq!(core.tombstones, HashSet::from([lingering.id]));
        assert!(core.remote.is_empty());
    }

    #[tokio::test]
    async fn own_mirror_writes_are_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let (mut core, _rx) = core(&dir);

        let record = core.capture(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(core.echoes, 1);
        core.handle(Message::Local(MirrorEvent::Upserted(record.id)));
        assert_eq!(core.echoes, 0);

        // a write through another handle is picked up
        let other = PhotoRecord::capture(ImageLocation::Remote("memory://public/o.png".into()), Utc::now());
        assert!(core.mirror.clone().upsert(other.clone()));
        core.handle(Message::Local(MirrorEvent::Upserted(other.id)));
        assert!(core.local.iter().any(|r| r.id == other.id));
    }

    #[tokio::test]
    async fn snapshot_is_mirrored_and_remote_deletions_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let (mut core, _rx) = core(&dir);
        let kept = PhotoRecord::capture(ImageLocation::Remote("memory://public/k.png".into()), Utc::now());
        let dropped = PhotoRecord::capture(ImageLocation::Remote("memory://public/d.png".into()), Utc::now());

        core.fetch();
        core.fetched(core.generation, Ok(vec![row(&kept), row(&dropped)]));
        assert_eq!(core.mirror.get_all().len(), 2);

        // deleted elsewhere without a push event
        core.fetch();
        core.fetched(core.generation, Ok(vec![row(&kept)]));

        let ids: Vec<PhotoId> = core.mirror.get_all().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![kept.id]);
        assert!(!core.shared.contains(&dropped.id));
        assert_eq!(core.compose().len(), 1);
    }
}
