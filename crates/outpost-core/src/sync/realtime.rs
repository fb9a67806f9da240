//! Realtime connection
//!
//! Maintains a long-lived WebSocket connection to the realtime server and
//! forwards decoded change events. Reconnects automatically with
//! exponential backoff.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{ClientMessage, RealtimeEvent};

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeStatus {
    /// Not connected, waiting to retry
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Subscribed and receiving events
    Connected,
}

/// Configuration for the realtime connection
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket URL
    pub url: String,
    /// Broadcast groups to subscribe to
    pub groups: Vec<String>,
    /// Initial reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum reconnect delay
    pub max_reconnect_delay: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            groups: Vec::new(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            url: url.into(),
            groups,
            ..Self::default()
        }
    }
}

/// Handle to the realtime task
pub struct RealtimeHandle {
    /// Decoded change events
    pub event_rx: mpsc::Receiver<RealtimeEvent>,
    /// Watch connection status
    pub status_rx: watch::Receiver<RealtimeStatus>,
    task: JoinHandle<()>,
}

impl RealtimeHandle {
    /// Split into the event stream and the task, for callers that consume
    /// events elsewhere
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<RealtimeEvent>,
        watch::Receiver<RealtimeStatus>,
        JoinHandle<()>,
    ) {
        (self.event_rx, self.status_rx, self.task)
    }

    /// Stop the task and close the connection
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Spawn the realtime task
///
/// The task runs until the handle is shut down or the event receiver is
/// dropped.
pub fn spawn_realtime(config: RealtimeConfig) -> RealtimeHandle {
    let (event_tx, event_rx) = mpsc::channel(64);
    let (status_tx, status_rx) = watch::channel(RealtimeStatus::Disconnected);

    let task = tokio::spawn(realtime_loop(config, event_tx, status_tx));

    RealtimeHandle {
        event_rx,
        status_rx,
        task,
    }
}

/// Main loop with reconnection
async fn realtime_loop(
    config: RealtimeConfig,
    event_tx: mpsc::Sender<RealtimeEvent>,
    status_tx: watch::Sender<RealtimeStatus>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        let _ = status_tx.send(RealtimeStatus::Connecting);

        match connect_and_listen(&config, &event_tx, &status_tx).await {
            Ok(true) => {
                debug!("Event receiver dropped, stopping realtime task");
                break;
            }
            Ok(false) => {
                // Closed by the server after a healthy session
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(e) => {
                warn!("Realtime connection error: {}", e);
            }
        }

        let _ = status_tx.send(RealtimeStatus::Disconnected);
        if event_tx.is_closed() {
            break;
        }

        debug!("Reconnecting in {:?}", reconnect_delay);
        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
    }
}

/// Connect, subscribe, and forward events until the connection ends
///
/// Returns `Ok(true)` when nobody listens for events anymore.
async fn connect_and_listen(
    config: &RealtimeConfig,
    event_tx: &mpsc::Sender<RealtimeEvent>,
    status_tx: &watch::Sender<RealtimeStatus>,
) -> Result<bool> {
    let (ws_stream, _) = connect_async(config.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe = ClientMessage::subscribe(&config.groups).encode()?;
    write.send(Message::Text(subscribe)).await?;

    info!("Realtime connected to {}", config.url);
    let _ = status_tx.send(RealtimeStatus::Connected);

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match RealtimeEvent::decode(&text) {
                Ok(event) => {
                    debug!("Realtime {}.{} {}", event.entity, event.kind, event.record.id);
                    if event_tx.send(event).await.is_err() {
                        write.close().await.ok();
                        return Ok(true);
                    }
                }
                Err(e) => warn!("Ignoring realtime frame: {}", e),
            },
            Some(Ok(Message::Ping(payload))) => {
                write.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Close(_))) | None => {
                return Ok(false);
            }
            Some(Err(e)) => {
                return Err(e.into());
            }
            _ => {}
        }
    }
}
