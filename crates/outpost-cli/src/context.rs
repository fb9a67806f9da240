//! Shared setup for commands that touch the queue

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use outpost_core::{
    Config, EntityKind, HttpProbe, HttpRemoteApi, OfflineSync, PendingOperation,
    ReachabilityProbe, RemoteApi, RemoteError, ServerRecord, SqliteStore, SyncOptions,
};

use crate::output::Output;

/// Remote used when no API URL is configured; never reachable
struct Unconfigured;

#[async_trait]
impl RemoteApi for Unconfigured {
    async fn execute(&self, _: &PendingOperation) -> Result<ServerRecord, RemoteError> {
        Err(RemoteError::Transient("API URL not configured".into()))
    }

    async fn fetch_list(&self, _: EntityKind) -> Result<Vec<ServerRecord>, RemoteError> {
        Err(RemoteError::Transient("API URL not configured".into()))
    }
}

/// An opened sync service plus what it was built from
pub struct App {
    pub config: Config,
    pub sync: Arc<OfflineSync>,
}

impl App {
    /// Open the local database and build the service
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;

        let store = SqliteStore::open(&config.database_path())
            .with_context(|| format!("Failed to open {:?}", config.database_path()))?;

        let remote: Arc<dyn RemoteApi> = match config.api_url.as_deref() {
            Some(url) => Arc::new(HttpRemoteApi::new(url).context("Failed to build HTTP client")?),
            None => Arc::new(Unconfigured),
        };

        let sync = OfflineSync::init(Arc::new(store), remote, SyncOptions::from(&config))
            .context("Failed to load offline state")?;
        Ok(Self { config, sync })
    }

    pub fn probe(&self) -> Option<Arc<dyn ReachabilityProbe>> {
        self.config
            .api_url
            .as_deref()
            .map(|url| Arc::new(HttpProbe::new(url)) as Arc<dyn ReachabilityProbe>)
    }

    /// Check reachability once and tell the service; returns the result
    pub async fn check_connectivity(&self) -> bool {
        let Some(probe) = self.probe() else {
            return false;
        };
        let reachable = probe.check().await;
        self.sync.report_connectivity(reachable);
        debug!("Server reachable: {}", reachable);
        reachable
    }

    /// Try to push the queue after a write, quietly
    pub async fn auto_flush(&self, output: &Output) {
        if self.sync.pending_count() == 0 || !self.check_connectivity().await {
            return;
        }
        if let Err(e) = self.sync.flush().await {
            if !output.is_quiet() {
                eprintln!("⚠ Auto-flush failed: {}", e);
            }
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.sync.dispose();
    }
}
