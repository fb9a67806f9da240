//! Offline sync service
//!
//! Main entry point for clients. Wires the queue, failure log, entity
//! cache, connectivity monitor, sync engine and notifier together around
//! one injected [`KeyValueStore`].
//!
//! # Lifecycle
//!
//! ```text
//! let sync = OfflineSync::init(store, remote, SyncOptions::from(&config))?;
//! sync.start();                         // flush on every trigger
//! sync.spawn_probe(Arc::new(HttpProbe::new(&config.api_url)));
//! sync.attach_realtime(RealtimeConfig::new(url, groups));
//! ...
//! sync.dispose();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::EntityCache;
use crate::config::{Config, DEFAULT_MAX_RETRIES};
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe, Transition};
use crate::failures::FailureLog;
use crate::models::{
    is_temp_id, EntityKind, FailedOperation, Fields, NewOperation, PendingOperation,
};
use crate::notifier::{Subscription, SyncNotifier};
use crate::queue::MutationQueue;
use crate::reconcile::{reconcile, RecentConfirmations, Resolutions, ViewItem};
use crate::storage::KeyValueStore;
use crate::sync::{
    spawn_realtime, EventKind, FlushReport, RealtimeConfig, RealtimeEvent, RealtimeStatus,
    RemoteApi, SyncEngine, SyncError, SyncResult,
};
use crate::view::{Applied, RenderedView};

/// Tunables for [`OfflineSync`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_retries: u32,
    /// Quiet period after reconnecting before a flush
    pub debounce: Duration,
    pub probe_interval: Duration,
    /// How far apart a provisional record and its confirmation may be
    /// created and still be matched heuristically
    pub match_window: chrono::Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            debounce: Duration::from_millis(1500),
            probe_interval: Duration::from_secs(30),
            match_window: chrono::Duration::seconds(120),
        }
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            debounce: config.debounce(),
            probe_interval: config.probe_interval(),
            match_window: config.match_window(),
        }
    }
}

/// Offline-first sync service
pub struct OfflineSync {
    queue: Arc<MutationQueue>,
    failures: Arc<FailureLog>,
    cache: EntityCache,
    remote: Arc<dyn RemoteApi>,
    engine: SyncEngine,
    notifier: SyncNotifier,
    monitor: Arc<ConnectivityMonitor>,
    resolutions: Arc<Resolutions>,
    recent: Arc<RecentConfirmations>,
    views: Mutex<HashMap<EntityKind, RenderedView>>,
    options: SyncOptions,
    triggers: Mutex<Option<mpsc::Receiver<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl OfflineSync {
    /// Load persisted state and build the service
    ///
    /// The service starts offline; nothing is sent until connectivity is
    /// reported and [`start`](Self::start) has been called.
    pub fn init(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApi>,
        options: SyncOptions,
    ) -> SyncResult<Arc<Self>> {
        let queue = Arc::new(MutationQueue::load(Arc::clone(&store))?);
        let failures = Arc::new(FailureLog::load(Arc::clone(&store))?);
        let cache = EntityCache::new(store);
        let notifier = SyncNotifier::new();
        let resolutions = Arc::new(Resolutions::new());
        let recent = Arc::new(RecentConfirmations::new());
        let (monitor, triggers) = ConnectivityMonitor::new(options.debounce);

        let engine = SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&failures),
            Arc::clone(&remote),
            notifier.clone(),
            Arc::clone(&resolutions),
            Arc::clone(&recent),
            options.max_retries,
        );

        let service = Self {
            queue,
            failures,
            cache,
            remote,
            engine,
            notifier,
            monitor: Arc::new(monitor),
            resolutions,
            recent,
            views: Mutex::new(HashMap::new()),
            options,
            triggers: Mutex::new(Some(triggers)),
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        };
        for entity in EntityKind::ALL {
            service.refresh_view(entity)?;
        }

        info!(
            "Offline sync ready: {} pending, {} failed",
            service.queue.len(),
            service.failures.len()
        );
        Ok(Arc::new(service))
    }

    /// Run a flush whenever the connectivity monitor asks for one
    ///
    /// Entities confirmed by a triggered flush are refetched afterwards.
    pub fn start(self: &Arc<Self>) {
        let Some(mut triggers) = self.lock_triggers().take() else {
            warn!("Offline sync already started");
            return;
        };

        let service = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while triggers.recv().await.is_some() {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.triggered_flush().await;
            }
            debug!("Flush trigger loop stopped");
        });
        self.track(handle);
    }

    /// Stop background work and drop every subscriber
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.monitor.shutdown();
        self.notifier.close();
        info!("Offline sync disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Persist a mutation
    ///
    /// Returns once the operation is durable. While online this also asks
    /// for a flush. A target that is a temp id of an already confirmed
    /// create is replaced by its server id.
    pub fn enqueue(&self, mut op: NewOperation) -> SyncResult<PendingOperation> {
        self.ensure_live()?;
        let entity = op.entity;
        if let Some(target) = op.target_id.take() {
            op.target_id = Some(self.resolve_target(entity, target)?);
        }
        let queued = self.queue.enqueue(op)?;

        if queued.is_create() {
            self.refresh_view(entity)?;
        }
        self.monitor.request_flush();
        Ok(queued)
    }

    /// Queue an asset check-in
    pub fn check_in(&self, asset_id: &str, payload: Fields) -> SyncResult<PendingOperation> {
        self.enqueue(NewOperation::domain(EntityKind::Asset, "check_in", asset_id, payload))
    }

    /// Queue an asset check-out
    pub fn check_out(&self, asset_id: &str, payload: Fields) -> SyncResult<PendingOperation> {
        self.enqueue(NewOperation::domain(EntityKind::Asset, "check_out", asset_id, payload))
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> Vec<PendingOperation> {
        self.queue.all()
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Feed a reachability observation from the platform
    pub fn report_connectivity(&self, reachable: bool) -> Option<Transition> {
        if self.is_disposed() {
            return None;
        }
        self.monitor.report(reachable)
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.monitor.subscribe()
    }

    /// Server records merged with unresolved local creates
    ///
    /// Creates confirmed by a flush stay listed until a refetch brings them
    /// into the cache.
    pub fn reconciled_view(&self, entity: EntityKind) -> SyncResult<Vec<ViewItem>> {
        let server_list = self.recent.overlay(entity, self.cache.get_cache(entity)?);
        Ok(reconcile(
            &server_list,
            &self.queue.pending_creates(entity),
            &self.failures.failed_creates(entity),
            &self.resolutions.snapshot(),
        ))
    }

    /// Current rendered list and counters
    pub fn rendered_view(&self, entity: EntityKind) -> RenderedView {
        self.lock_views()
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| RenderedView::empty(entity))
    }

    /// Replace the cached list with the server's and rebuild the view
    pub async fn refetch(&self, entity: EntityKind) -> SyncResult<RenderedView> {
        self.ensure_live()?;
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let records = self.remote.fetch_list(entity).await?;
        debug!("Fetched {} {}", records.len(), entity.plural());
        self.cache.set_cache(entity, &records)?;
        self.recent.clear(entity);
        self.refresh_view(entity)?;
        self.prune_resolutions()?;
        Ok(self.rendered_view(entity))
    }

    /// Drain the queue now
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        self.ensure_live()?;
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let result = self.engine.flush().await;
        if matches!(&result, Ok(report) if report.skipped) {
            return result;
        }
        // Whatever the pass persisted before an error is rendered too
        for entity in EntityKind::ALL {
            self.refresh_view(entity)?;
        }
        let report = result?;
        self.prune_resolutions()?;
        Ok(report)
    }

    /// Apply a change pushed by the realtime server
    ///
    /// Works online or offline; the payload is a confirmed record.
    pub fn apply_realtime(&self, event: &RealtimeEvent) -> SyncResult<Applied> {
        self.ensure_live()?;
        match event.kind {
            EventKind::Created => self.cache.upsert(event.entity, &event.record)?,
            EventKind::Updated | EventKind::StatusChanged => {
                self.cache.patch(event.entity, &event.record)?;
                self.recent.patch(event.entity, &event.record);
            }
            EventKind::Deleted => {
                self.cache.remove(event.entity, &event.record.id)?;
                self.recent.remove(event.entity, &event.record.id);
            }
        }

        let applied = {
            let mut views = self.lock_views();
            let view = views
                .entry(event.entity)
                .or_insert_with(|| RenderedView::empty(event.entity));
            view.apply(event, self.options.match_window)
        };
        if let Some((temp_id, id)) = applied.resolution() {
            debug!("Realtime confirmed {} as {}", temp_id, id);
            self.resolutions.insert(temp_id, id);
        }
        Ok(applied)
    }

    /// Operations in the "failed, not synced" state
    pub fn failures(&self) -> Vec<FailedOperation> {
        self.failures.all()
    }

    /// Forget a failed operation
    pub fn dismiss_failure(&self, op_id: &str) -> SyncResult<FailedOperation> {
        self.ensure_live()?;
        let failed = self
            .failures
            .take(op_id)?
            .ok_or_else(|| SyncError::UnknownFailure(op_id.to_string()))?;
        self.refresh_view(failed.operation.entity)?;
        self.prune_resolutions()?;
        Ok(failed)
    }

    /// Put a failed operation back at the tail of the queue
    ///
    /// It keeps its temp id and gets a fresh retry budget.
    pub fn retry_failure(&self, op_id: &str) -> SyncResult<PendingOperation> {
        self.ensure_live()?;
        let failed = self
            .failures
            .all()
            .into_iter()
            .find(|f| f.operation.id == op_id)
            .ok_or_else(|| SyncError::UnknownFailure(op_id.to_string()))?;

        let op = failed.operation;
        let target_id = match op.target_id {
            Some(target) => Some(self.resolve_target(op.entity, target)?),
            None => None,
        };
        let requeue = NewOperation {
            entity: op.entity,
            op_type: op.op_type,
            payload: op.payload,
            temp_id: op.temp_id,
            target_id,
        };

        // Queue first: a crash in between leaves a duplicate, never a loss
        let queued = self.queue.enqueue(requeue)?;
        self.failures.take(op_id)?;
        info!("Re-queued {} {} ({})", queued.entity, queued.op_type, queued.short_id());

        self.refresh_view(queued.entity)?;
        self.monitor.request_flush();
        Ok(queued)
    }

    /// Poll a reachability probe in the background
    pub fn spawn_probe(&self, probe: Arc<dyn ReachabilityProbe>) {
        let handle = self
            .monitor
            .spawn_probe_loop(probe, self.options.probe_interval);
        self.track(handle);
    }

    /// Consume realtime events in the background
    ///
    /// A live realtime connection also counts as proof of connectivity.
    pub fn attach_realtime(self: &Arc<Self>, config: RealtimeConfig) {
        let (mut events, mut status, task) = spawn_realtime(config).into_parts();

        let service = Arc::downgrade(self);
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let Some(service) = service.upgrade() else { break };
                        if let Err(e) = service.apply_realtime(&event) {
                            warn!("Failed to apply realtime event: {}", e);
                        }
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = *status.borrow_and_update() == RealtimeStatus::Connected;
                        if connected {
                            let Some(service) = service.upgrade() else { break };
                            service.report_connectivity(true);
                        }
                    }
                }
            }
        });

        self.track(task);
        self.track(consumer);
    }

    async fn triggered_flush(&self) {
        let report = match self.flush().await {
            Ok(report) => report,
            Err(SyncError::Offline) => {
                debug!("Went offline before flush started");
                return;
            }
            Err(e) => {
                warn!("Flush failed: {}", e);
                return;
            }
        };

        for entity in report.synced {
            if let Err(e) = self.refetch(entity).await {
                warn!("Refetch of {} after flush failed: {}", entity.plural(), e);
            }
        }
    }

    /// Server id for a temp id whose create is already confirmed
    ///
    /// Falls back to a known record echoing the temp id as its client
    /// reference. Anything else is returned unchanged.
    fn resolve_target(&self, entity: EntityKind, target: String) -> SyncResult<String> {
        if !is_temp_id(&target) {
            return Ok(target);
        }
        if let Some(id) = self.resolutions.get(&target) {
            debug!("Targeting {} instead of {}", id, target);
            return Ok(id);
        }
        let known = self.recent.overlay(entity, self.cache.get_cache(entity)?);
        Ok(known
            .into_iter()
            .find(|r| r.client_ref() == Some(target.as_str()))
            .map(|r| r.id)
            .unwrap_or(target))
    }

    /// Forget correlations nothing depends on anymore
    ///
    /// A correlation stays while a queued or failed operation still names
    /// its temp id, or until its record has reached the entity cache.
    fn prune_resolutions(&self) -> SyncResult<()> {
        let mut referenced: HashSet<String> = HashSet::new();
        let operations = self
            .queue
            .all()
            .into_iter()
            .chain(self.failures.all().into_iter().map(|f| f.operation));
        for op in operations {
            referenced.extend(op.temp_id);
            referenced.extend(op.target_id);
        }

        let mut cached: HashSet<String> = HashSet::new();
        for entity in EntityKind::ALL {
            cached.extend(self.cache.get_cache(entity)?.into_iter().map(|r| r.id));
        }

        let pruned = self
            .resolutions
            .retain(|temp_id, server_id| referenced.contains(temp_id) || !cached.contains(server_id));
        if pruned > 0 {
            debug!("Pruned {} resolved temp ids, {} kept", pruned, self.resolutions.len());
        }
        Ok(())
    }

    fn refresh_view(&self, entity: EntityKind) -> SyncResult<()> {
        let items = self.reconciled_view(entity)?;
        self.lock_views()
            .entry(entity)
            .or_insert_with(|| RenderedView::empty(entity))
            .replace_all(items);
        Ok(())
    }

    fn ensure_live(&self) -> SyncResult<()> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        if self.is_disposed() {
            handle.abort();
            return;
        }
        self.lock_tasks().push(handle);
    }

    fn lock_views(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKind, RenderedView>> {
        self.views.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_triggers(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Receiver<()>>> {
        self.triggers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for OfflineSync {
    fn drop(&mut self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}
