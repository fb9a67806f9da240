//! Sync event notifications
//!
//! In-process publish/subscribe used to tell UI-facing consumers when to
//! refetch authoritative lists or surface a failed operation. Each
//! subscriber gets its own unbounded channel; dropping (or explicitly
//! unsubscribing) the [`Subscription`] removes it from the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::models::{EntityKind, FailureReason};

/// Events published by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// At least one operation for this entity was confirmed during a flush
    Synced(EntityKind),
    /// An operation left the queue without being applied
    Failed {
        entity: EntityKind,
        op_id: String,
        temp_id: Option<String>,
        reason: FailureReason,
    },
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<SyncEvent>>,
}

/// Publish/subscribe hub for [`SyncEvent`]s
#[derive(Clone, Default)]
pub struct SyncNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl SyncNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(id, tx);

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an event to every live subscriber, returning how many got it
    pub fn publish(&self, event: SyncEvent) -> usize {
        let mut registry = self.lock();
        registry
            .subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        debug!(
            "Published {:?} to {} subscribers",
            event,
            registry.subscribers.len()
        );
        registry.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop every subscriber; their `recv` then returns `None`
    pub fn close(&self) {
        self.lock().subscribers.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle for one subscriber; unsubscribes on drop
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<SyncEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Wait for the next event, `None` once the notifier is closed
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// All events queued so far
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.subscribers.remove(&self.id);
        }
    }
}
