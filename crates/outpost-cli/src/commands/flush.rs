//! Flush command handler

use anyhow::{bail, Result};
use tracing::warn;

use crate::context::App;
use crate::output::Output;

/// Send the queue to the server now
pub async fn run(app: &App, output: &Output) -> Result<()> {
    if app.config.api_url.is_none() {
        bail!(
            "API URL not configured. Set it with:\n  \
             outpost config set api_url https://your-server/api"
        );
    }

    if !app.check_connectivity().await {
        bail!(
            "Server unreachable. {} operation(s) stay queued.",
            app.sync.pending_count()
        );
    }

    let report = app.sync.flush().await?;
    output.print_flush(&report);

    // Pull the confirmed records so views show server ids
    for entity in &report.synced {
        if let Err(e) = app.sync.refetch(*entity).await {
            warn!("Refetch of {} failed: {}", entity.plural(), e);
        }
    }

    Ok(())
}
