//! Status command handler

use anyhow::Result;

use outpost_core::EntityKind;

use crate::context::App;
use crate::output::{Output, OutputFormat};

/// Show connectivity, queue and cache status
pub async fn show(app: &App, output: &Output) -> Result<()> {
    let online = app.check_connectivity().await;
    let pending = app.sync.pending_count();
    let failed = app.sync.failures().len();
    let config = &app.config;

    match output.format {
        OutputFormat::Json => {
            let views: serde_json::Map<String, serde_json::Value> = EntityKind::ALL
                .iter()
                .map(|entity| {
                    let view = app.sync.rendered_view(*entity);
                    (
                        entity.plural().to_string(),
                        serde_json::json!({
                            "total": view.counters.total,
                            "pending": view.counters.pending,
                            "failed": view.counters.failed,
                        }),
                    )
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "online": online,
                    "pending": pending,
                    "failed": failed,
                    "api_url": config.api_url,
                    "realtime_url": config.realtime_url,
                    "groups": config.groups,
                    "database": config.database_path(),
                    "views": views,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", pending);
        }
        OutputFormat::Human => {
            println!("Outpost Status");
            println!("==============");
            println!();
            println!("Connectivity:");
            println!("  Status:   {}", if online { "online" } else { "offline" });
            println!(
                "  API:      {}",
                config.api_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Realtime: {}",
                config.realtime_url.as_deref().unwrap_or("(not set)")
            );
            println!();
            println!("Queue:");
            println!("  Pending: {}", pending);
            println!("  Failed:  {}", failed);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.database_path().display());
            println!();
            println!("Contents:");
            for entity in EntityKind::ALL {
                let view = app.sync.rendered_view(entity);
                println!(
                    "  {:<8} {} ({} pending sync)",
                    format!("{}:", entity.plural()),
                    view.counters.total,
                    view.counters.pending
                );
            }
        }
    }

    Ok(())
}
