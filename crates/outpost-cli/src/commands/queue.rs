//! Queue command handler

use anyhow::Result;

use crate::context::App;
use crate::output::Output;

/// List pending operations, oldest first
pub fn list(app: &App, output: &Output) -> Result<()> {
    output.print_queue(&app.sync.pending());
    Ok(())
}
