//! Rendered list state
//!
//! A [`RenderedView`] is what the UI shows for one entity kind: the
//! reconciled items plus counters derived from them. Realtime events are
//! applied incrementally; anything else rebuilds it from
//! [`reconcile`](crate::reconcile::reconcile).
//!
//! ## Matching created events
//!
//! A `created` event may be the confirmation of one of our own provisional
//! records. Exact correlation uses the `client_ref` the server echoes back;
//! an echoed key that names none of our provisionals means the record was
//! created by another client, and it is inserted as is. Without a key, a
//! provisional matches when every discriminating field the two share is
//! equal and the record was created within the match window of the
//! provisional. When several match, the oldest wins.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::models::{EntityKind, ServerRecord};
use crate::reconcile::{ProvisionalRecord, ProvisionalState, ViewItem};
use crate::sync::{EventKind, RealtimeEvent};

/// Derived counts over the rendered items
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounters {
    pub total: usize,
    /// Provisional items still waiting in the queue
    pub pending: usize,
    /// Provisional items that failed to sync
    pub failed: usize,
    pub by_status: BTreeMap<String, usize>,
}

impl ViewCounters {
    fn from_items(items: &[ViewItem]) -> Self {
        let mut counters = ViewCounters {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            if let ViewItem::Provisional(p) = item {
                match p.state {
                    ProvisionalState::PendingSync => counters.pending += 1,
                    ProvisionalState::Failed { .. } => counters.failed += 1,
                }
            }
            if let Some(status) = item.status() {
                *counters.by_status.entry(status.to_string()).or_default() += 1;
            }
        }
        counters
    }
}

/// What applying a realtime event did to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A provisional record was replaced in place by its confirmation
    Replaced { temp_id: String, id: String },
    /// The confirmation was already rendered; the provisional was dropped
    Merged { temp_id: String, id: String },
    /// A record from elsewhere was added at the top
    Inserted,
    /// An already rendered record was patched or replaced
    Updated,
    Removed,
    /// The event concerned nothing in the view
    Ignored,
}

impl Applied {
    /// `temp id → server id` correlation established by this change
    pub fn resolution(&self) -> Option<(&str, &str)> {
        match self {
            Applied::Replaced { temp_id, id } | Applied::Merged { temp_id, id } => {
                Some((temp_id, id))
            }
            _ => None,
        }
    }
}

/// Items and counters for one entity kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedView {
    pub entity: EntityKind,
    pub items: Vec<ViewItem>,
    pub counters: ViewCounters,
}

impl RenderedView {
    pub fn new(entity: EntityKind, items: Vec<ViewItem>) -> Self {
        let counters = ViewCounters::from_items(&items);
        Self {
            entity,
            items,
            counters,
        }
    }

    pub fn empty(entity: EntityKind) -> Self {
        Self::new(entity, Vec::new())
    }

    /// Swap in a freshly reconciled list
    pub fn replace_all(&mut self, items: Vec<ViewItem>) {
        self.items = items;
        self.recount();
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| !item.is_provisional() && item.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(ViewItem::id).collect()
    }

    /// Apply a realtime event for this view's entity
    pub fn apply(&mut self, event: &RealtimeEvent, window: Duration) -> Applied {
        if event.entity != self.entity {
            return Applied::Ignored;
        }
        let applied = match event.kind {
            EventKind::Created => self.apply_created(&event.record, window),
            EventKind::Updated | EventKind::StatusChanged => self.apply_updated(&event.record),
            EventKind::Deleted => self.apply_deleted(&event.record.id),
        };
        debug!("{}.{} {} -> {:?}", event.entity, event.kind, event.record.id, applied);
        applied
    }

    pub fn apply_created(&mut self, record: &ServerRecord, window: Duration) -> Applied {
        let existing = self.position(&record.id);

        let Some(slot) = self.find_provisional(record, window) else {
            return match existing {
                Some(pos) => {
                    self.items[pos] = ViewItem::Confirmed(record.clone());
                    self.recount();
                    Applied::Updated
                }
                None => {
                    self.items.insert(0, ViewItem::Confirmed(record.clone()));
                    self.recount();
                    Applied::Inserted
                }
            };
        };

        let temp_id = self.items[slot].id().to_string();
        let applied = match existing {
            Some(pos) => {
                self.items[pos] = ViewItem::Confirmed(record.clone());
                self.items.remove(slot);
                Applied::Merged {
                    temp_id,
                    id: record.id.clone(),
                }
            }
            None => {
                self.items[slot] = ViewItem::Confirmed(record.clone());
                Applied::Replaced {
                    temp_id,
                    id: record.id.clone(),
                }
            }
        };
        self.recount();
        applied
    }

    /// Merge changed fields into a rendered record
    pub fn apply_updated(&mut self, record: &ServerRecord) -> Applied {
        let Some(pos) = self.position(&record.id) else {
            return Applied::Ignored;
        };
        if let ViewItem::Confirmed(current) = &mut self.items[pos] {
            for (name, value) in &record.fields {
                current.fields.insert(name.clone(), value.clone());
            }
        }
        self.recount();
        Applied::Updated
    }

    pub fn apply_deleted(&mut self, id: &str) -> Applied {
        match self.position(id) {
            Some(pos) => {
                self.items.remove(pos);
                self.recount();
                Applied::Removed
            }
            None => Applied::Ignored,
        }
    }

    /// Index of the provisional item a confirmed record stands for
    fn find_provisional(&self, record: &ServerRecord, window: Duration) -> Option<usize> {
        let provisional = || {
            self.items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| item.as_provisional().map(|p| (i, p)))
        };

        if let Some(client_ref) = record.client_ref() {
            return provisional()
                .find(|(_, p)| p.temp_id == client_ref)
                .map(|(i, _)| i);
        }

        let fields = self.entity.discriminating_fields();
        let created_at = record.created_at().unwrap_or_else(Utc::now);

        provisional()
            .filter(|(_, p)| p.is_pending())
            .filter(|(_, p)| same_business_fields(fields, p, record))
            .filter(|(_, p)| {
                let delta = created_at - p.created_at;
                delta <= window && delta >= -window
            })
            .min_by_key(|(_, p)| p.enqueued_at)
            .map(|(i, _)| i)
    }

    fn recount(&mut self) {
        self.counters = ViewCounters::from_items(&self.items);
    }
}

fn same_business_fields(fields: &[&str], provisional: &ProvisionalRecord, record: &ServerRecord) -> bool {
    let mut compared = 0;
    for name in fields {
        match (provisional.fields.get(*name), record.fields.get(*name)) {
            (Some(a), Some(b)) if a == b => compared += 1,
            (None, None) => {}
            _ => return false,
        }
    }
    compared > 0
}
