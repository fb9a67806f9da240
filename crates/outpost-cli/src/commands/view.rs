//! View and refetch command handlers

use anyhow::{bail, Result};

use outpost_core::EntityKind;

use crate::context::App;
use crate::output::Output;

/// Show what the UI would render for an entity kind, from local state
pub fn show(app: &App, entity: EntityKind, output: &Output) -> Result<()> {
    output.print_view(&app.sync.rendered_view(entity));
    Ok(())
}

/// Replace the cached list with the server's, then show it
pub async fn refetch(app: &App, entity: EntityKind, output: &Output) -> Result<()> {
    if !app.check_connectivity().await {
        bail!("Server unreachable. Showing cached data with `outpost view {}`.", entity);
    }

    let view = app.sync.refetch(entity).await?;
    output.print_view(&view);
    Ok(())
}
