//! Reconciliation view
//!
//! Pure merge of the authoritative list with locally pending creates.
//! The output is what the UI renders for an entity kind:
//!
//! ```text
//! [provisional records, newest first] ++ server records
//! ```
//!
//! A pending create is hidden as soon as its temp id shows up as confirmed
//! in the server list. The queue entry itself stays until the sync engine
//! removes it through the normal success path.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{
    EntityKind, FailedOperation, FailureReason, Fields, PendingOperation, ServerRecord,
};

/// Sync state of a provisional record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProvisionalState {
    /// Waiting in the queue
    PendingSync,
    /// Dropped from the queue; needs user attention
    Failed { reason: FailureReason },
}

/// Locally synthesized stand-in for a record the server has not confirmed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionalRecord {
    pub op_id: String,
    pub temp_id: String,
    pub fields: Fields,
    pub enqueued_at: u64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: ProvisionalState,
}

impl ProvisionalRecord {
    fn from_operation(op: &PendingOperation, state: ProvisionalState) -> Option<Self> {
        let temp_id = op.temp_id.clone()?;
        Some(Self {
            op_id: op.id.clone(),
            temp_id,
            fields: op.payload.clone(),
            enqueued_at: op.enqueued_at,
            created_at: op.created_at,
            state,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.state == ProvisionalState::PendingSync
    }
}

/// One row of a rendered list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewItem {
    Confirmed(ServerRecord),
    Provisional(ProvisionalRecord),
}

impl ViewItem {
    /// Server id, or temp id for provisional records
    pub fn id(&self) -> &str {
        match self {
            ViewItem::Confirmed(record) => &record.id,
            ViewItem::Provisional(provisional) => &provisional.temp_id,
        }
    }

    pub fn fields(&self) -> &Fields {
        match self {
            ViewItem::Confirmed(record) => &record.fields,
            ViewItem::Provisional(provisional) => &provisional.fields,
        }
    }

    pub fn status(&self) -> Option<&str> {
        self.fields().get("status").and_then(|v| v.as_str())
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, ViewItem::Provisional(_))
    }

    pub fn as_confirmed(&self) -> Option<&ServerRecord> {
        match self {
            ViewItem::Confirmed(record) => Some(record),
            ViewItem::Provisional(_) => None,
        }
    }

    pub fn as_provisional(&self) -> Option<&ProvisionalRecord> {
        match self {
            ViewItem::Provisional(provisional) => Some(provisional),
            ViewItem::Confirmed(_) => None,
        }
    }
}

/// Known `temp id → server id` correlations
///
/// Filled when a flush confirms a create and when a realtime event
/// replaces a provisional record.
#[derive(Debug, Default)]
pub struct Resolutions {
    map: Mutex<HashMap<String, String>>,
}

impl Resolutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, temp_id: &str, server_id: &str) {
        self.lock()
            .insert(temp_id.to_string(), server_id.to_string());
    }

    pub fn get(&self, temp_id: &str) -> Option<String> {
        self.lock().get(temp_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    /// Drop every correlation `keep` rejects; returns how many went
    pub fn retain(&self, mut keep: impl FnMut(&str, &str) -> bool) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|temp_id, server_id| keep(temp_id, server_id));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Creates confirmed by a flush that no list fetch has returned yet
///
/// Bridges the gap between the flush removing a create from the queue and
/// the refetch that brings its record into the entity cache. In memory
/// only; a refetch of the entity clears it.
#[derive(Debug, Default)]
pub struct RecentConfirmations {
    map: Mutex<HashMap<EntityKind, Vec<ServerRecord>>>,
}

impl RecentConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a confirmed record, newest first
    pub fn record(&self, entity: EntityKind, record: ServerRecord) {
        let mut map = self.lock();
        let records = map.entry(entity).or_default();
        records.retain(|r| r.id != record.id);
        records.insert(0, record);
    }

    /// Merge changed fields into a remembered record
    pub fn patch(&self, entity: EntityKind, record: &ServerRecord) {
        if let Some(existing) = self
            .lock()
            .get_mut(&entity)
            .and_then(|records| records.iter_mut().find(|r| r.id == record.id))
        {
            for (name, value) in &record.fields {
                existing.fields.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn remove(&self, entity: EntityKind, id: &str) {
        if let Some(records) = self.lock().get_mut(&entity) {
            records.retain(|r| r.id != id);
        }
    }

    /// Forget everything for an entity once the server list is fresh
    pub fn clear(&self, entity: EntityKind) {
        self.lock().remove(&entity);
    }

    pub fn records(&self, entity: EntityKind) -> Vec<ServerRecord> {
        self.lock().get(&entity).cloned().unwrap_or_default()
    }

    /// Remembered records missing from `cached`, placed ahead of it
    pub fn overlay(&self, entity: EntityKind, cached: Vec<ServerRecord>) -> Vec<ServerRecord> {
        let cached_ids: HashSet<&str> = cached.iter().map(|r| r.id.as_str()).collect();
        let mut list: Vec<ServerRecord> = self
            .records(entity)
            .into_iter()
            .filter(|r| !cached_ids.contains(r.id.as_str()))
            .collect();
        list.extend(cached);
        list
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKind, Vec<ServerRecord>>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a temp id is already represented by a confirmed record
struct Confirmed<'a> {
    ids: HashSet<&'a str>,
    client_refs: HashSet<&'a str>,
    resolved: &'a HashMap<String, String>,
}

impl<'a> Confirmed<'a> {
    fn new(server_list: &'a [ServerRecord], resolved: &'a HashMap<String, String>) -> Self {
        Self {
            ids: server_list.iter().map(|r| r.id.as_str()).collect(),
            client_refs: server_list.iter().filter_map(|r| r.client_ref()).collect(),
            resolved,
        }
    }

    fn contains(&self, temp_id: &str) -> bool {
        self.ids.contains(temp_id)
            || self.client_refs.contains(temp_id)
            || self
                .resolved
                .get(temp_id)
                .is_some_and(|id| self.ids.contains(id.as_str()))
    }
}

/// Merge authoritative records with unresolved local creates
///
/// `pending_creates` and `failed_creates` must belong to the same entity
/// kind as `server_list`.
pub fn reconcile(
    server_list: &[ServerRecord],
    pending_creates: &[PendingOperation],
    failed_creates: &[FailedOperation],
    resolved: &HashMap<String, String>,
) -> Vec<ViewItem> {
    let confirmed = Confirmed::new(server_list, resolved);

    let pending = pending_creates
        .iter()
        .filter_map(|op| ProvisionalRecord::from_operation(op, ProvisionalState::PendingSync));
    let failed = failed_creates.iter().filter_map(|f| {
        ProvisionalRecord::from_operation(
            &f.operation,
            ProvisionalState::Failed {
                reason: f.reason.clone(),
            },
        )
    });

    let mut provisional: Vec<ProvisionalRecord> = pending
        .chain(failed)
        .filter(|p| !confirmed.contains(&p.temp_id))
        .collect();
    provisional.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));

    provisional
        .into_iter()
        .map(ViewItem::Provisional)
        .chain(server_list.iter().cloned().map(ViewItem::Confirmed))
        .collect()
}
