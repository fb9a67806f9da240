//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use outpost_core::{
    FailedOperation, FlushReport, PendingOperation, RenderedView, SyncEvent, ViewItem,
};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print a queued operation
    pub fn print_operation(&self, op: &PendingOperation) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:        {}", op.id);
                println!("Operation: {} {}", op.op_type, op.entity);
                if let Some(ref temp_id) = op.temp_id {
                    println!("Temp ID:   {}", temp_id);
                }
                if let Some(ref target) = op.target_id {
                    println!("Target:    {}", target);
                }
                println!("Queued:    {}", op.created_at.format("%Y-%m-%d %H:%M:%S"));
            }
            OutputFormat::Json => self.json(op),
            OutputFormat::Quiet => println!("{}", op.temp_id.as_deref().unwrap_or(&op.id)),
        }
    }

    /// Print the pending queue, oldest first
    pub fn print_queue(&self, ops: &[PendingOperation]) {
        match self.format {
            OutputFormat::Human => {
                if ops.is_empty() {
                    println!("Nothing pending.");
                    return;
                }
                for op in ops {
                    let retries = if op.retry_count > 0 {
                        format!(" (retry {})", op.retry_count)
                    } else {
                        String::new()
                    };
                    println!(
                        "{} | {:<10} {:<6} | {}{}",
                        op.short_id(),
                        op.op_type.to_string(),
                        op.entity.as_str(),
                        truncate(
                            op.target_id.as_deref().or(op.temp_id.as_deref()).unwrap_or("-"),
                            45
                        ),
                        retries
                    );
                }
                println!("\n{} pending operation(s)", ops.len());
            }
            OutputFormat::Json => self.json(ops),
            OutputFormat::Quiet => {
                for op in ops {
                    println!("{}", op.id);
                }
            }
        }
    }

    /// Print a rendered list with its counters
    pub fn print_view(&self, view: &RenderedView) {
        match self.format {
            OutputFormat::Human => {
                if view.items.is_empty() {
                    println!("No {} found.", view.entity.plural());
                    return;
                }
                for item in &view.items {
                    println!(
                        "{:<12} | {:<35} | {:<12} | {}",
                        truncate(item.id(), 12),
                        truncate(label(item), 35),
                        item.status().unwrap_or("-"),
                        marker(item)
                    );
                }
                let counters = &view.counters;
                let mut summary = format!("\n{} {}", counters.total, view.entity.plural());
                if counters.pending > 0 {
                    summary.push_str(&format!(", {} pending sync", counters.pending));
                }
                if counters.failed > 0 {
                    summary.push_str(&format!(", {} failed", counters.failed));
                }
                println!("{}", summary);
                for (status, count) in &counters.by_status {
                    println!("  {}: {}", status, count);
                }
            }
            OutputFormat::Json => self.json(view),
            OutputFormat::Quiet => {
                for item in &view.items {
                    println!("{}", item.id());
                }
            }
        }
    }

    /// Print operations in the failed state
    pub fn print_failures(&self, failures: &[FailedOperation]) {
        match self.format {
            OutputFormat::Human => {
                if failures.is_empty() {
                    println!("No failed operations.");
                    return;
                }
                for failed in failures {
                    let op = &failed.operation;
                    println!(
                        "{} | {} {} | {} | {}",
                        op.short_id(),
                        op.op_type,
                        op.entity,
                        failed.failed_at.format("%Y-%m-%d %H:%M"),
                        truncate(&failed.reason.to_string(), 60)
                    );
                }
                println!("\n{} failed operation(s)", failures.len());
            }
            OutputFormat::Json => self.json(failures),
            OutputFormat::Quiet => {
                for failed in failures {
                    println!("{}", failed.operation.id);
                }
            }
        }
    }

    /// Print the outcome of a flush pass
    pub fn print_flush(&self, report: &FlushReport) {
        match self.format {
            OutputFormat::Human => {
                if report.skipped {
                    println!("A flush is already running.");
                    return;
                }
                println!(
                    "✓ {} sent, {} confirmed, {} retrying, {} failed, {} deferred",
                    report.attempted,
                    report.succeeded,
                    report.retried,
                    report.dropped,
                    report.deferred
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "attempted": report.attempted,
                        "succeeded": report.succeeded,
                        "retried": report.retried,
                        "dropped": report.dropped,
                        "deferred": report.deferred,
                        "skipped": report.skipped,
                        "synced": report.synced.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
                    })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a sync event as it arrives
    pub fn print_event(&self, event: &SyncEvent) {
        match (self.format, event) {
            (OutputFormat::Human, SyncEvent::Synced(entity)) => {
                println!("✓ {} synced", entity.plural());
            }
            (OutputFormat::Human, SyncEvent::Failed { entity, op_id, reason, .. }) => {
                println!("✗ {} {} failed: {}", entity, &op_id[..op_id.len().min(8)], reason);
            }
            (OutputFormat::Json, SyncEvent::Synced(entity)) => {
                println!("{}", serde_json::json!({"event": "synced", "entity": entity}));
            }
            (OutputFormat::Json, SyncEvent::Failed { entity, op_id, temp_id, reason }) => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "failed",
                        "entity": entity,
                        "op_id": op_id,
                        "temp_id": temp_id,
                        "reason": reason,
                    })
                );
            }
            (OutputFormat::Quiet, _) => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Title for reports, name for assets
fn label(item: &ViewItem) -> &str {
    let fields = item.fields();
    fields
        .get("title")
        .or_else(|| fields.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("(untitled)")
}

fn marker(item: &ViewItem) -> &'static str {
    match item.as_provisional() {
        Some(p) if p.is_pending() => "pending sync",
        Some(_) => "failed, not synced",
        None => "",
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
