//! Queue flushing
//!
//! Drains the mutation queue in FIFO order against the remote API.
//!
//! ## Outcomes per operation
//!
//! - success: removed from the queue; a create also records its
//!   `temp id → server id` correlation and retargets dependent operations
//! - rejected by the server: dropped immediately into the failure log
//! - transient failure: retry count incremented, dropped once it reaches
//!   the retry budget
//!
//! After a transient failure, later operations on the same object are
//! deferred to the next pass so they never overtake it. Operations aimed
//! at a temp id wait while the create behind it is still queued or sits in
//! the failure log; if that create is gone they are rejected locally.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::SyncResult;
use super::remote::{RemoteApi, RemoteError};
use crate::failures::FailureLog;
use crate::models::{EntityKind, FailureReason, PendingOperation};
use crate::notifier::{SyncEvent, SyncNotifier};
use crate::queue::MutationQueue;
use crate::reconcile::{RecentConfirmations, Resolutions};

/// Summary of one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Operations sent to the server
    pub attempted: usize,
    pub succeeded: usize,
    /// Transient failures kept in the queue
    pub retried: usize,
    /// Operations moved to the failure log
    pub dropped: usize,
    /// Operations held back behind a failed or unconfirmed operation on
    /// the same object
    pub deferred: usize,
    /// Another flush was already running; nothing was done
    pub skipped: bool,
    /// Entities with at least one confirmed operation, in confirmation order
    pub synced: Vec<EntityKind>,
}

/// Clears the in-flight flag when the pass ends, however it ends
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// What to do with an operation whose target is still a temp id
enum TempTarget {
    /// The create was confirmed; the operation now points at this id
    Resolved(String),
    /// The create has not been confirmed yet
    Wait,
    /// No create for this temp id exists anymore
    Orphaned,
}

/// Sends queued operations to the server
pub struct SyncEngine {
    queue: Arc<MutationQueue>,
    failures: Arc<FailureLog>,
    remote: Arc<dyn RemoteApi>,
    notifier: SyncNotifier,
    resolutions: Arc<Resolutions>,
    recent: Arc<RecentConfirmations>,
    max_retries: u32,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<MutationQueue>,
        failures: Arc<FailureLog>,
        remote: Arc<dyn RemoteApi>,
        notifier: SyncNotifier,
        resolutions: Arc<Resolutions>,
        recent: Arc<RecentConfirmations>,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            failures,
            remote,
            notifier,
            resolutions,
            recent,
            max_retries: max_retries.max(1),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a flush pass is currently running
    pub fn is_flushing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one pass over the queue
    ///
    /// Returns immediately with `skipped` set if a pass is already running.
    /// Storage errors abort the pass; whatever was already persisted stays
    /// and entities confirmed before the error are still announced.
    pub async fn flush(&self) -> SyncResult<FlushReport> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            debug!("Flush already in progress, skipping");
            return Ok(FlushReport {
                skipped: true,
                ..FlushReport::default()
            });
        };

        let snapshot = self.queue.all();
        if snapshot.is_empty() {
            return Ok(FlushReport::default());
        }
        info!("Flushing {} pending operations", snapshot.len());

        let mut report = FlushReport::default();
        let mut blocked: HashSet<(EntityKind, String)> = HashSet::new();
        let mut outcome = Ok(());

        for queued in snapshot {
            // Re-read: an earlier create in this pass may have retargeted it
            let Some(op) = self.queue.get(&queued.id) else {
                continue;
            };
            if let Err(e) = self.process(op, &mut report, &mut blocked).await {
                warn!("Flush aborted: {}", e);
                outcome = Err(e);
                break;
            }
        }

        for entity in &report.synced {
            self.notifier.publish(SyncEvent::Synced(*entity));
        }
        outcome?;

        info!(
            "Flush done: {} confirmed, {} retrying, {} dropped, {} deferred",
            report.succeeded, report.retried, report.dropped, report.deferred
        );
        Ok(report)
    }

    async fn process(
        &self,
        mut op: PendingOperation,
        report: &mut FlushReport,
        blocked: &mut HashSet<(EntityKind, String)>,
    ) -> SyncResult<()> {
        if let Some(temp_id) = op.temp_target().map(str::to_string) {
            match self.resolve_temp_target(&temp_id) {
                TempTarget::Resolved(id) => {
                    self.queue.retarget(&temp_id, &id)?;
                    op.target_id = Some(id);
                }
                TempTarget::Wait => {
                    debug!("Holding {} ({}) until {} is confirmed", op.op_type, op.short_id(), temp_id);
                    report.deferred += 1;
                    return Ok(());
                }
                TempTarget::Orphaned => {
                    let message = format!("{} was never confirmed by the server", temp_id);
                    self.drop_operation(op, FailureReason::Rejected { message })?;
                    report.dropped += 1;
                    return Ok(());
                }
            }
        }

        if let Some((entity, key)) = op.object_key() {
            if blocked.contains(&(entity, key.to_string())) {
                debug!("Deferring {} ({}) behind failed operation", op.op_type, op.short_id());
                report.deferred += 1;
                return Ok(());
            }
        }

        report.attempted += 1;
        match self.remote.execute(&op).await {
            Ok(record) => {
                self.queue.remove(&op.id)?;
                if let Some(temp_id) = op.temp_id.as_deref().filter(|_| op.is_create()) {
                    self.resolutions.insert(temp_id, &record.id);
                    let moved = self.queue.retarget(temp_id, &record.id)?;
                    if moved > 0 {
                        debug!("Retargeted {} operations {} -> {}", moved, temp_id, record.id);
                    }
                }
                debug!("{} {} ({}) confirmed as {}", op.entity, op.op_type, op.short_id(), record.id);
                if op.is_create() {
                    self.recent.record(op.entity, record);
                }
                report.succeeded += 1;
                if !report.synced.contains(&op.entity) {
                    report.synced.push(op.entity);
                }
            }
            Err(err) if !err.is_retryable() => {
                let message = match &err {
                    RemoteError::Validation { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                self.drop_operation(op, FailureReason::Rejected { message })?;
                report.dropped += 1;
            }
            Err(err) => {
                warn!("{} {} ({}) failed: {}", op.entity, op.op_type, op.short_id(), err);
                if let Some((entity, key)) = op.object_key() {
                    blocked.insert((entity, key.to_string()));
                }

                let attempts = self.queue.record_failure(&op.id)?.unwrap_or(op.retry_count + 1);
                if attempts >= self.max_retries {
                    op.retry_count = attempts;
                    let reason = FailureReason::RetryExhausted {
                        attempts,
                        last_error: err.to_string(),
                    };
                    self.drop_operation(op, reason)?;
                    report.dropped += 1;
                } else {
                    report.retried += 1;
                }
            }
        }
        Ok(())
    }

    fn resolve_temp_target(&self, temp_id: &str) -> TempTarget {
        if let Some(id) = self.resolutions.get(temp_id) {
            TempTarget::Resolved(id)
        } else if self.queue.has_create(temp_id) || self.failures.has_create(temp_id) {
            TempTarget::Wait
        } else {
            TempTarget::Orphaned
        }
    }

    /// Move an operation to the failure log and announce it
    ///
    /// The failure is written before the queue entry is removed, so a crash
    /// in between leaves a duplicate rather than losing the operation.
    fn drop_operation(&self, op: PendingOperation, reason: FailureReason) -> SyncResult<()> {
        let failed = self.failures.record(op, reason)?;
        self.queue.remove(&failed.operation.id)?;

        self.notifier.publish(SyncEvent::Failed {
            entity: failed.operation.entity,
            op_id: failed.operation.id.clone(),
            temp_id: failed.operation.temp_id.clone(),
            reason: failed.reason,
        });
        Ok(())
    }
}
