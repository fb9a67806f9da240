//! Failure command handlers

use anyhow::{bail, Context, Result};

use outpost_core::FailedOperation;

use crate::context::App;
use crate::output::Output;

/// List operations in the failed state
pub fn list(app: &App, output: &Output) -> Result<()> {
    output.print_failures(&app.sync.failures());
    Ok(())
}

/// Forget a failed operation
pub fn dismiss(app: &App, id: String, output: &Output) -> Result<()> {
    let op_id = resolve_id(&app.sync.failures(), &id)?;
    app.sync
        .dismiss_failure(&op_id)
        .context("Failed to dismiss")?;

    output.success(&format!("Dismissed {}", &op_id[..op_id.len().min(8)]));
    Ok(())
}

/// Put a failed operation back in the queue
pub fn retry(app: &App, id: String, output: &Output) -> Result<()> {
    let op_id = resolve_id(&app.sync.failures(), &id)?;
    let op = app
        .sync
        .retry_failure(&op_id)
        .context("Failed to re-queue")?;

    output.success("Operation re-queued");
    output.print_operation(&op);
    Ok(())
}

/// Resolve a full or prefix operation id
fn resolve_id(failures: &[FailedOperation], id: &str) -> Result<String> {
    let matches: Vec<&FailedOperation> = failures
        .iter()
        .filter(|f| f.operation.id.starts_with(id))
        .collect();

    match matches.as_slice() {
        [] => bail!("No failed operation matching '{}'", id),
        [only] => Ok(only.operation.id.clone()),
        _ => bail!(
            "Ambiguous id '{}' matches {} failed operations",
            id,
            matches.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use outpost_core::{EntityKind, FailureReason, OpType, PendingOperation};

    fn failed(id: &str) -> FailedOperation {
        FailedOperation {
            operation: PendingOperation {
                id: id.to_string(),
                entity: EntityKind::Asset,
                op_type: OpType::Delete,
                payload: Default::default(),
                temp_id: None,
                target_id: Some("A-1".into()),
                enqueued_at: 1,
                created_at: Utc::now(),
                retry_count: 3,
            },
            reason: FailureReason::Rejected {
                message: "gone".into(),
            },
            failed_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_id_by_prefix() {
        let failures = vec![failed("abc123"), failed("abd456")];
        assert_eq!(resolve_id(&failures, "abc").unwrap(), "abc123");
        assert_eq!(resolve_id(&failures, "abd456").unwrap(), "abd456");
        assert!(resolve_id(&failures, "ab").is_err());
        assert!(resolve_id(&failures, "zzz").is_err());
    }
}
