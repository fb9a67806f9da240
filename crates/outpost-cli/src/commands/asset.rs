//! Asset command handlers

use anyhow::{Context, Result};

use outpost_core::models::Fields;
use outpost_core::{EntityKind, NewOperation};

use crate::context::App;
use crate::output::Output;

/// Queue a new asset
pub fn create(app: &App, name: String, category: String, output: &Output) -> Result<()> {
    let mut fields = Fields::new();
    fields.insert("name".into(), name.into());
    fields.insert("category".into(), category.into());
    fields.insert("status".into(), "available".into());

    let op = app
        .sync
        .enqueue(NewOperation::create(EntityKind::Asset, fields))
        .context("Failed to queue asset")?;

    output.success("Asset saved, pending sync");
    output.print_operation(&op);
    Ok(())
}

/// Queue a check-in
pub fn check_in(app: &App, id: String, output: &Output) -> Result<()> {
    let op = app
        .sync
        .check_in(&id, Fields::new())
        .context("Failed to queue check-in")?;

    output.success(&format!("Check-in of {} queued", id));
    output.print_operation(&op);
    Ok(())
}

/// Queue a check-out, optionally recording who holds the asset
pub fn check_out(app: &App, id: String, holder: Option<String>, output: &Output) -> Result<()> {
    let mut fields = Fields::new();
    if let Some(holder) = holder {
        fields.insert("holder".into(), holder.into());
    }

    let op = app
        .sync
        .check_out(&id, fields)
        .context("Failed to queue check-out")?;

    output.success(&format!("Check-out of {} queued", id));
    output.print_operation(&op);
    Ok(())
}
