//! Server synchronization
//!
//! Two directions:
//!
//! - **Outbound**: [`SyncEngine`] drains the mutation queue through a
//!   [`RemoteApi`], one call per operation, oldest first.
//! - **Inbound**: [`spawn_realtime`] keeps a WebSocket open to the realtime
//!   server and yields [`RealtimeEvent`]s for records other clients (or
//!   this one) changed.
//!
//! ## Protocol
//!
//! 1. Connect via WebSocket
//! 2. Send `{"action":"subscribe","groups":[...]}`
//! 3. Receive `{"event":"<entity>.<kind>","group":...,"data":{...}}` frames

mod engine;
mod error;
mod message;
mod realtime;
mod remote;

pub use engine::{FlushReport, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use message::{ClientMessage, EventKind, MessageError, RealtimeEvent};
pub use realtime::{spawn_realtime, RealtimeConfig, RealtimeHandle, RealtimeStatus};
pub use remote::{HttpRemoteApi, Method, RemoteApi, RemoteError, Route};
