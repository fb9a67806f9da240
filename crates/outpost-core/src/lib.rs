//! Outpost Core Library
//!
//! Offline-first data layer for Outpost field clients. Field staff create
//! reports and check assets in and out without coverage; every mutation is
//! queued durably, replayed against the server when connectivity returns,
//! and merged with realtime changes pushed by the server.
//!
//! # Architecture
//!
//! - **MutationQueue**: durable FIFO of pending operations (source of truth
//!   for user intent while offline)
//! - **EntityCache**: last known authoritative list per entity kind
//! - **SyncEngine**: single-flight queue replay with bounded retries
//! - **ConnectivityMonitor**: online/offline state and debounced flush
//!   triggers
//! - **Realtime**: WebSocket event stream patched into cache and views
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(SqliteStore::open(&config.database_path())?);
//! let remote = Arc::new(HttpRemoteApi::new(&config.api_url)?);
//! let sync = OfflineSync::init(store, remote, SyncOptions::from(&config))?;
//! sync.start();
//!
//! // Queue a report; it shows up as a provisional record right away
//! sync.enqueue(NewOperation::create(EntityKind::Report, payload))?;
//! let view = sync.rendered_view(EntityKind::Report);
//! ```
//!
//! # Modules
//!
//! - `service`: The [`OfflineSync`] service (main entry point)
//! - `models`: Operations, records and failure reasons
//! - `queue`, `failures`, `cache`: Persistent state on top of `storage`
//! - `reconcile`, `view`: What the UI renders
//! - `sync`: Remote API, flush engine and realtime connection
//! - `connectivity`, `notifier`: Online state and sync events
//! - `config`: Application configuration

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod failures;
pub mod models;
pub mod notifier;
pub mod queue;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod sync;
pub mod view;

pub use cache::EntityCache;
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, HttpProbe, ReachabilityProbe, Transition};
pub use failures::FailureLog;
pub use models::{
    is_temp_id, EntityKind, FailedOperation, FailureReason, Fields, NewOperation, OpType,
    PendingOperation, ServerRecord, TEMP_ID_PREFIX,
};
pub use notifier::{Subscription, SyncEvent, SyncNotifier};
pub use queue::MutationQueue;
pub use reconcile::{
    reconcile, ProvisionalRecord, ProvisionalState, RecentConfirmations, Resolutions, ViewItem,
};
pub use service::{OfflineSync, SyncOptions};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore, StorageError};
pub use sync::{
    FlushReport, HttpRemoteApi, RealtimeConfig, RealtimeEvent, RemoteApi, RemoteError, SyncError,
    SyncResult,
};
pub use view::{Applied, RenderedView, ViewCounters};
