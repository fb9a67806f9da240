//! Entity cache
//!
//! Last server-confirmed snapshot per entity kind. Snapshots are replaced
//! wholesale from list fetches; the only incremental writes come from
//! realtime events, which also carry server-confirmed records. Nothing
//! optimistic or pending is ever written here, so the offline fallback
//! view only shows data the server has confirmed.

use std::sync::Arc;

use tracing::debug;

use crate::models::{EntityKind, ServerRecord};
use crate::storage::{JsonStoreExt, KeyValueStore, StorageResult};

/// Persisted snapshots of server-confirmed collections
pub struct EntityCache {
    store: Arc<dyn KeyValueStore>,
}

impl EntityCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Storage key for an entity kind
    pub fn key(entity: EntityKind) -> String {
        format!("cache:{}", entity.as_str())
    }

    /// Replace the snapshot for an entity kind
    pub fn set_cache(&self, entity: EntityKind, records: &[ServerRecord]) -> StorageResult<()> {
        self.store.set_json(&Self::key(entity), records)?;
        debug!("Cached {} {} records", records.len(), entity);
        Ok(())
    }

    /// Last snapshot, or an empty collection
    pub fn get_cache(&self, entity: EntityKind) -> StorageResult<Vec<ServerRecord>> {
        Ok(self
            .store
            .get_json(&Self::key(entity))?
            .unwrap_or_default())
    }

    /// Insert or replace one confirmed record by id
    ///
    /// New records go to the head, matching the newest-first list order.
    pub fn upsert(&self, entity: EntityKind, record: &ServerRecord) -> StorageResult<()> {
        let mut records = self.get_cache(entity)?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.insert(0, record.clone()),
        }
        self.set_cache(entity, &records)
    }

    /// Merge changed fields into one cached record
    ///
    /// Returns false when the record is not cached.
    pub fn patch(&self, entity: EntityKind, record: &ServerRecord) -> StorageResult<bool> {
        let mut records = self.get_cache(entity)?;
        let Some(existing) = records.iter_mut().find(|r| r.id == record.id) else {
            return Ok(false);
        };
        for (name, value) in &record.fields {
            existing.fields.insert(name.clone(), value.clone());
        }
        self.set_cache(entity, &records)?;
        Ok(true)
    }

    /// Remove one record by id, returning whether it was cached
    pub fn remove(&self, entity: EntityKind, id: &str) -> StorageResult<bool> {
        let mut records = self.get_cache(entity)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.set_cache(entity, &records)?;
        Ok(true)
    }

    /// Drop the snapshot for an entity kind
    pub fn clear(&self, entity: EntityKind) -> StorageResult<()> {
        self.store.remove(&Self::key(entity))
    }
}
