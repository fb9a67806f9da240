//! Report command handlers

use anyhow::{bail, Context, Result};

use outpost_core::models::Fields;
use outpost_core::{EntityKind, NewOperation};

use crate::context::App;
use crate::output::Output;

/// Queue a new report
pub fn create(
    app: &App,
    title: String,
    category: String,
    author: Option<String>,
    body: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut fields = Fields::new();
    fields.insert("title".into(), title.into());
    fields.insert("category".into(), category.into());
    fields.insert("status".into(), "open".into());
    if let Some(author) = author {
        fields.insert("author".into(), author.into());
    }
    if let Some(body) = body {
        fields.insert("body".into(), body.into());
    }

    let op = app
        .sync
        .enqueue(NewOperation::create(EntityKind::Report, fields))
        .context("Failed to queue report")?;

    output.success("Report saved, pending sync");
    output.print_operation(&op);
    Ok(())
}

/// Queue changes to an existing report
pub fn update(
    app: &App,
    id: String,
    title: Option<String>,
    status: Option<String>,
    output: &Output,
) -> Result<()> {
    let mut fields = Fields::new();
    if let Some(title) = title {
        fields.insert("title".into(), title.into());
    }
    if let Some(status) = status {
        fields.insert("status".into(), status.into());
    }
    if fields.is_empty() {
        bail!("Nothing to update. Pass --title and/or --status.");
    }

    let op = app
        .sync
        .enqueue(NewOperation::update(EntityKind::Report, id, fields))
        .context("Failed to queue update")?;

    output.success("Update queued");
    output.print_operation(&op);
    Ok(())
}

/// Queue deletion of a report
pub fn delete(app: &App, id: String, output: &Output) -> Result<()> {
    let op = app
        .sync
        .enqueue(NewOperation::delete(EntityKind::Report, id))
        .context("Failed to queue delete")?;

    output.success("Delete queued");
    output.print_operation(&op);
    Ok(())
}
