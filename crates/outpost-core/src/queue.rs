//! Persistent mutation queue
//!
//! Durable, globally ordered list of operations waiting to be sent.
//! This is the only place mutation intent lives while the device is
//! offline, so every change is written through to storage before the
//! call returns. A failed write leaves the in-memory queue untouched.
//!
//! The whole queue is stored as one JSON array under [`QUEUE_KEY`];
//! a single-key write is atomic in every [`KeyValueStore`].

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::models::{
    EntityKind, NewOperation, OpType, PendingOperation, CLIENT_REF_FIELD, TEMP_ID_PREFIX,
};
use crate::storage::{JsonStoreExt, KeyValueStore, StorageResult};

/// Storage key of the pending queue
pub const QUEUE_KEY: &str = "queue:pending";

struct QueueState {
    ops: Vec<PendingOperation>,
    /// Highest `enqueued_at` ever handed out by this instance
    last_stamp: u64,
}

/// FIFO queue of pending operations, persisted on every change
pub struct MutationQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
}

impl MutationQueue {
    /// Load the queue from storage (empty if nothing was stored)
    pub fn load(store: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let mut ops: Vec<PendingOperation> = store.get_json(QUEUE_KEY)?.unwrap_or_default();
        ops.sort_by_key(|op| op.enqueued_at);
        let last_stamp = ops.last().map(|op| op.enqueued_at).unwrap_or(0);

        if !ops.is_empty() {
            info!("Loaded {} pending operations", ops.len());
        }

        Ok(Self {
            store,
            state: Mutex::new(QueueState { ops, last_stamp }),
        })
    }

    /// Append an operation and persist it before returning
    ///
    /// Creates get a temp id (unless the caller chose one) which is also
    /// attached to the payload as the idempotency key.
    pub fn enqueue(&self, new_op: NewOperation) -> StorageResult<PendingOperation> {
        let mut state = self.lock();

        let now = Utc::now();
        let stamp = (now.timestamp_millis().max(0) as u64).max(state.last_stamp + 1);

        let mut payload = new_op.payload;
        let temp_id = if new_op.op_type == OpType::Create {
            let temp_id = new_op
                .temp_id
                .unwrap_or_else(|| format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()));
            payload
                .entry(CLIENT_REF_FIELD)
                .or_insert_with(|| Value::String(temp_id.clone()));
            Some(temp_id)
        } else {
            None
        };

        let op = PendingOperation {
            id: uuid::Uuid::new_v4().to_string(),
            entity: new_op.entity,
            op_type: new_op.op_type,
            payload,
            temp_id,
            target_id: new_op.target_id,
            enqueued_at: stamp,
            created_at: now,
            retry_count: 0,
        };

        let mut next = state.ops.clone();
        next.push(op.clone());
        self.store.set_json(QUEUE_KEY, &next)?;

        state.ops = next;
        state.last_stamp = stamp;
        debug!(
            "Enqueued {} {} ({}), {} pending",
            op.entity,
            op.op_type,
            op.short_id(),
            state.ops.len()
        );
        Ok(op)
    }

    /// Remove exactly one operation by id
    pub fn remove(&self, id: &str) -> StorageResult<Option<PendingOperation>> {
        let mut state = self.lock();
        let Some(pos) = state.ops.iter().position(|op| op.id == id) else {
            return Ok(None);
        };

        let mut next = state.ops.clone();
        let removed = next.remove(pos);
        self.store.set_json(QUEUE_KEY, &next)?;

        state.ops = next;
        Ok(Some(removed))
    }

    /// Increment the retry count of an operation, returning the new count
    pub fn record_failure(&self, id: &str) -> StorageResult<Option<u32>> {
        let mut state = self.lock();
        let Some(pos) = state.ops.iter().position(|op| op.id == id) else {
            return Ok(None);
        };

        let mut next = state.ops.clone();
        next[pos].retry_count += 1;
        let count = next[pos].retry_count;
        self.store.set_json(QUEUE_KEY, &next)?;

        state.ops = next;
        Ok(Some(count))
    }

    /// Point queued operations that targeted a temp id at its server id
    ///
    /// Returns how many operations were rewritten.
    pub fn retarget(&self, temp_id: &str, server_id: &str) -> StorageResult<usize> {
        let mut state = self.lock();
        let affected = state
            .ops
            .iter()
            .filter(|op| op.target_id.as_deref() == Some(temp_id))
            .count();
        if affected == 0 {
            return Ok(0);
        }

        let mut next = state.ops.clone();
        for op in next.iter_mut() {
            if op.target_id.as_deref() == Some(temp_id) {
                op.target_id = Some(server_id.to_string());
            }
        }
        self.store.set_json(QUEUE_KEY, &next)?;

        state.ops = next;
        debug!("Retargeted {} operations from {} to {}", affected, temp_id, server_id);
        Ok(affected)
    }

    /// Look up one operation
    pub fn get(&self, id: &str) -> Option<PendingOperation> {
        self.lock().ops.iter().find(|op| op.id == id).cloned()
    }

    /// All operations, oldest first
    pub fn all(&self) -> Vec<PendingOperation> {
        self.lock().ops.clone()
    }

    /// Operations for one entity kind, oldest first
    pub fn by_entity(&self, entity: EntityKind) -> Vec<PendingOperation> {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.entity == entity)
            .cloned()
            .collect()
    }

    /// Pending creates for one entity kind, oldest first
    pub fn pending_creates(&self, entity: EntityKind) -> Vec<PendingOperation> {
        self.lock()
            .ops
            .iter()
            .filter(|op| op.entity == entity && op.is_create())
            .cloned()
            .collect()
    }

    /// Whether the create that introduced `temp_id` is still queued
    pub fn has_create(&self, temp_id: &str) -> bool {
        self.lock()
            .ops
            .iter()
            .any(|op| op.is_create() && op.temp_id.as_deref() == Some(temp_id))
    }

    pub fn len(&self) -> usize {
        self.lock().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ops.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields;
    use crate::storage::{MemoryStore, SqliteStore, StorageError};
    use tempfile::TempDir;

    fn report(title: &str) -> NewOperation {
        NewOperation::create(
            EntityKind::Report,
            fields([("title", title), ("category", "patrol")]),
        )
    }

    #[test]
    fn test_enqueue_assigns_ids_and_order() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();

        let a = queue.enqueue(report("First")).unwrap();
        let b = queue.enqueue(report("Second")).unwrap();
        let c = queue
            .enqueue(NewOperation::delete(EntityKind::Report, "R-1"))
            .unwrap();

        assert_ne!(a.id, b.id);
        assert!(a.enqueued_at < b.enqueued_at);
        assert!(b.enqueued_at < c.enqueued_at);
        assert_eq!(a.retry_count, 0);

        let ids: Vec<_> = queue.all().into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_create_gets_temp_id_and_client_ref() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();

        let op = queue.enqueue(report("Patrol note")).unwrap();
        let temp_id = op.temp_id.clone().unwrap();
        assert!(temp_id.starts_with("tmp-"));
        assert_eq!(op.payload[CLIENT_REF_FIELD], temp_id.as_str());

        let chosen = queue.enqueue(report("Other").with_temp_id("T1")).unwrap();
        assert_eq!(chosen.temp_id.as_deref(), Some("T1"));
        assert_eq!(chosen.payload[CLIENT_REF_FIELD], "T1");
    }

    #[test]
    fn test_non_create_has_no_temp_id() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();
        let op = queue
            .enqueue(NewOperation::domain(
                EntityKind::Asset,
                "check_in",
                "A-7",
                Default::default(),
            ))
            .unwrap();
        assert!(op.temp_id.is_none());
        assert!(!op.payload.contains_key(CLIENT_REF_FIELD));
    }

    #[test]
    fn test_enqueue_persists_before_returning() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("outpost.db");

        let op = {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let queue = MutationQueue::load(store).unwrap();
            queue.enqueue(report("Survives restart")).unwrap()
        };

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let queue = MutationQueue::load(store).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.all()[0], op);

        // Stamps keep increasing after a reload
        let next = queue.enqueue(report("After restart")).unwrap();
        assert!(next.enqueued_at > op.enqueued_at);
    }

    #[test]
    fn test_enqueue_write_failure_propagates() {
        let store = Arc::new(MemoryStore::new());
        let queue = MutationQueue::load(store.clone()).unwrap();
        queue.enqueue(report("Kept")).unwrap();

        store.reject_writes(true);
        let err = queue.enqueue(report("Lost")).unwrap_err();
        assert!(matches!(err, StorageError::WriteRejected { .. }));

        // In-memory view never diverges from what was persisted
        assert_eq!(queue.len(), 1);
        store.reject_writes(false);
        let reloaded = MutationQueue::load(store).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_remove_exactly_one() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();
        let a = queue.enqueue(report("A")).unwrap();
        let b = queue.enqueue(report("B")).unwrap();

        let removed = queue.remove(&a.id).unwrap().unwrap();
        assert_eq!(removed.id, a.id);
        assert!(queue.remove(&a.id).unwrap().is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.all()[0].id, b.id);
    }

    #[test]
    fn test_by_entity_and_pending_creates() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();
        queue.enqueue(report("A")).unwrap();
        queue
            .enqueue(NewOperation::create(
                EntityKind::Asset,
                fields([("name", "Bike 12")]),
            ))
            .unwrap();
        queue
            .enqueue(NewOperation::update(
                EntityKind::Report,
                "R-1",
                fields([("title", "B")]),
            ))
            .unwrap();

        let reports = queue.by_entity(EntityKind::Report);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].enqueued_at < reports[1].enqueued_at);

        let creates = queue.pending_creates(EntityKind::Report);
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].payload["title"], "A");

        let temp_id = creates[0].temp_id.clone().unwrap();
        assert!(queue.has_create(&temp_id));
        assert!(!queue.has_create("tmp-gone"));
    }

    #[test]
    fn test_record_failure_increments() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();
        let op = queue.enqueue(report("Flaky")).unwrap();

        assert_eq!(queue.record_failure(&op.id).unwrap(), Some(1));
        assert_eq!(queue.record_failure(&op.id).unwrap(), Some(2));
        assert_eq!(queue.get(&op.id).unwrap().retry_count, 2);
        assert_eq!(queue.record_failure("missing").unwrap(), None);
    }

    #[test]
    fn test_retarget_rewrites_dependents() {
        let queue = MutationQueue::load(Arc::new(MemoryStore::new())).unwrap();
        let create = queue
            .enqueue(
                NewOperation::create(EntityKind::Asset, fields([("name", "Bike 12")]))
                    .with_temp_id("T-bike"),
            )
            .unwrap();
        let check_in = queue
            .enqueue(NewOperation::domain(
                EntityKind::Asset,
                "check_in",
                "T-bike",
                Default::default(),
            ))
            .unwrap();

        assert_eq!(queue.retarget("T-bike", "A-100").unwrap(), 1);
        assert_eq!(
            queue.get(&check_in.id).unwrap().target_id.as_deref(),
            Some("A-100")
        );
        // The create itself keeps its temp id
        assert_eq!(queue.get(&create.id).unwrap().temp_id.as_deref(), Some("T-bike"));
        assert_eq!(queue.retarget("T-bike", "A-100").unwrap(), 0);
    }
}
