//! Connectivity monitor
//!
//! Tracks `OFFLINE ⇄ ONLINE` from reachability reports. Reports are pushed
//! by the platform (network change callbacks, realtime socket state) via
//! [`ConnectivityMonitor::report`]; [`ConnectivityMonitor::spawn_probe_loop`]
//! is a coarse periodic fallback.
//!
//! Every OFFLINE → ONLINE transition schedules one flush trigger after a
//! debounce window. Any later transition inside the window cancels it, so
//! a flapping link produces a single trigger once it settles online.
//! Triggers go through a capacity-1 channel and coalesce if unconsumed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A state change reported by [`ConnectivityMonitor::report`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

/// Something that can tell whether the server is reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Probe that issues `GET <base>/health`
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/health", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            // Any answer below 500 means the server is there
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!("Reachability probe failed: {}", e);
                false
            }
        }
    }
}

/// Online/offline state machine with debounced flush triggers
pub struct ConnectivityMonitor {
    status_tx: watch::Sender<bool>,
    /// Bumped on every transition; a scheduled trigger only fires if the
    /// epoch it was scheduled in is still current
    epoch: Arc<AtomicU64>,
    debounce: Duration,
    trigger_tx: mpsc::Sender<()>,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor (initially offline) and the receiver of its flush
    /// triggers
    pub fn new(debounce: Duration) -> (Self, mpsc::Receiver<()>) {
        let (status_tx, _) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let monitor = Self {
            status_tx,
            epoch: Arc::new(AtomicU64::new(0)),
            debounce,
            trigger_tx,
            scheduled: Mutex::new(None),
        };
        (monitor, trigger_rx)
    }

    pub fn is_online(&self) -> bool {
        *self.status_tx.borrow()
    }

    /// Watch online state; the receiver sees every transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status_tx.subscribe()
    }

    /// Feed a reachability observation into the state machine
    pub fn report(&self, reachable: bool) -> Option<Transition> {
        let previous = self.status_tx.send_replace(reachable);
        if previous == reachable {
            return None;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.cancel_scheduled();

        if reachable {
            info!("Connectivity: online");
            self.schedule_trigger(epoch);
            Some(Transition::WentOnline)
        } else {
            info!("Connectivity: offline");
            Some(Transition::WentOffline)
        }
    }

    /// Ask for a flush right away, without debounce
    ///
    /// Ignored while offline. Returns whether a trigger is now waiting.
    pub fn request_flush(&self) -> bool {
        if !self.is_online() {
            return false;
        }
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Poll a probe every `interval` and report the result
    pub fn spawn_probe_loop(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let reachable = probe.check().await;
                monitor.report(reachable);
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Cancel any scheduled trigger
    pub fn shutdown(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_scheduled();
    }

    fn schedule_trigger(&self, epoch: u64) {
        let current = Arc::clone(&self.epoch);
        let trigger_tx = self.trigger_tx.clone();
        let debounce = self.debounce;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, firing flush trigger without debounce");
            let _ = trigger_tx.try_send(());
            return;
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if current.load(Ordering::SeqCst) == epoch {
                debug!("Debounce elapsed, requesting flush");
                // Full channel means a trigger is already waiting
                let _ = trigger_tx.try_send(());
            }
        });

        *self.scheduled.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    fn cancel_scheduled(&self) {
        if let Some(handle) = self
            .scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.cancel_scheduled();
    }
}
