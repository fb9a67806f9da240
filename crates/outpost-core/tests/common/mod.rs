//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use outpost_core::{
    EntityKind, Fields, MemoryStore, OfflineSync, OpType, PendingOperation, RemoteApi,
    RemoteError, ServerRecord, SyncOptions,
};

/// In-memory stand-in for the authoritative server
///
/// Applies operations to its own collections so refetches see them.
/// Scripted answers take precedence over the default behaviour.
#[derive(Default)]
pub struct FakeServer {
    collections: Mutex<HashMap<EntityKind, Vec<ServerRecord>>>,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

pub enum Scripted {
    /// Confirm with this server id
    Id(String),
    Fail(RemoteError),
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed the collection returned by list fetches
    pub fn seed(&self, entity: EntityKind, records: Vec<ServerRecord>) {
        self.collections.lock().unwrap().insert(entity, records);
    }

    pub fn list(&self, entity: EntityKind) -> Vec<ServerRecord> {
        self.collections
            .lock()
            .unwrap()
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    pub fn confirm_as(&self, id: &str) {
        self.script.lock().unwrap().push_back(Scripted::Id(id.to_string()));
    }

    pub fn fail_with(&self, error: RemoteError) {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
    }

    pub fn fail_transient(&self, times: usize) {
        for _ in 0..times {
            self.fail_with(RemoteError::Transient("connection reset".into()));
        }
    }

    /// `"<op> <entity> <target>"` for every execute call, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Make execute calls wait until [`release`](Self::release)
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn next_server_id(&self, entity: EntityKind) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        match entity {
            EntityKind::Report => format!("M-{}", *next),
            EntityKind::Asset => format!("A-{}", *next),
        }
    }

    fn apply(&self, op: &PendingOperation, id: String) -> ServerRecord {
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(op.entity).or_default();

        match &op.op_type {
            OpType::Create => {
                let record = ServerRecord::new(id, op.payload.clone());
                records.insert(0, record.clone());
                record
            }
            OpType::Delete => {
                records.retain(|r| r.id != id);
                ServerRecord::new(id, Fields::new())
            }
            OpType::Update | OpType::Domain(_) => {
                let mut patch = op.payload.clone();
                if let OpType::Domain(action) = &op.op_type {
                    let status = if action == "check_in" { "available" } else { "checked_out" };
                    patch.insert("status".into(), status.into());
                }
                match records.iter_mut().find(|r| r.id == id) {
                    Some(existing) => {
                        existing.fields.extend(patch);
                        existing.clone()
                    }
                    None => ServerRecord::new(id, patch),
                }
            }
        }
    }
}

#[async_trait]
impl RemoteApi for FakeServer {
    async fn execute(&self, op: &PendingOperation) -> Result<ServerRecord, RemoteError> {
        self.calls.lock().unwrap().push(format!(
            "{} {} {}",
            op.op_type,
            op.entity,
            op.target_id.as_deref().unwrap_or("-")
        ));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let id = match scripted {
            Some(Scripted::Fail(error)) => return Err(error),
            Some(Scripted::Id(id)) => id,
            None => match &op.target_id {
                Some(target) => target.clone(),
                None => self.next_server_id(op.entity),
            },
        };
        Ok(self.apply(op, id))
    }

    async fn fetch_list(&self, entity: EntityKind) -> Result<Vec<ServerRecord>, RemoteError> {
        Ok(self.list(entity))
    }
}

pub fn options() -> SyncOptions {
    SyncOptions {
        debounce: Duration::from_millis(50),
        ..SyncOptions::default()
    }
}

/// Service on a fresh in-memory store
pub fn service(server: &Arc<FakeServer>) -> Arc<OfflineSync> {
    OfflineSync::init(
        Arc::new(MemoryStore::new()),
        Arc::clone(server) as Arc<dyn RemoteApi>,
        options(),
    )
    .expect("init")
}

/// Let spawned tasks run until `done` holds or give up
pub async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}
