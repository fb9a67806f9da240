//! Terminal sync failures
//!
//! Operations dropped from the queue (retry budget exhausted or rejected
//! by the server) are kept here in a "failed, not synced" state until the
//! user dismisses or retries them, instead of silently disappearing.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;

use crate::models::{EntityKind, FailedOperation, FailureReason, PendingOperation};
use crate::storage::{JsonStoreExt, KeyValueStore, StorageResult};

/// Storage key of the failure list
pub const FAILED_KEY: &str = "queue:failed";

/// Persisted list of operations that will not be retried automatically
pub struct FailureLog {
    store: Arc<dyn KeyValueStore>,
    entries: Mutex<Vec<FailedOperation>>,
}

impl FailureLog {
    pub fn load(store: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let entries = store.get_json(FAILED_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    /// Record a dropped operation
    pub fn record(
        &self,
        operation: PendingOperation,
        reason: FailureReason,
    ) -> StorageResult<FailedOperation> {
        let mut entries = self.lock();
        warn!(
            "{} {} ({}) failed permanently: {}",
            operation.entity,
            operation.op_type,
            operation.short_id(),
            reason
        );

        let failed = FailedOperation {
            operation,
            reason,
            failed_at: Utc::now(),
        };

        let mut next = entries.clone();
        next.push(failed.clone());
        self.store.set_json(FAILED_KEY, &next)?;
        *entries = next;
        Ok(failed)
    }

    /// Remove a failure by operation id
    pub fn take(&self, op_id: &str) -> StorageResult<Option<FailedOperation>> {
        let mut entries = self.lock();
        let Some(pos) = entries.iter().position(|f| f.operation.id == op_id) else {
            return Ok(None);
        };

        let mut next = entries.clone();
        let taken = next.remove(pos);
        self.store.set_json(FAILED_KEY, &next)?;
        *entries = next;
        Ok(Some(taken))
    }

    pub fn all(&self) -> Vec<FailedOperation> {
        self.lock().clone()
    }

    /// Failed creates for one entity kind
    pub fn failed_creates(&self, entity: EntityKind) -> Vec<FailedOperation> {
        self.lock()
            .iter()
            .filter(|f| f.operation.entity == entity && f.operation.is_create())
            .cloned()
            .collect()
    }

    /// Whether the create that introduced `temp_id` is waiting here
    pub fn has_create(&self, temp_id: &str) -> bool {
        self.lock()
            .iter()
            .any(|f| f.operation.is_create() && f.operation.temp_id.as_deref() == Some(temp_id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FailedOperation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
