//! Watch command handler
//!
//! Runs the service in the foreground: flushes on reconnect, applies
//! realtime events, and prints sync events until interrupted.

use anyhow::Result;

use outpost_core::RealtimeConfig;

use crate::context::App;
use crate::output::Output;

pub async fn run(app: &App, output: &Output) -> Result<()> {
    let sync = &app.sync;
    let mut events = sync.subscribe();
    let mut connectivity = sync.subscribe_connectivity();

    sync.start();
    match app.probe() {
        Some(probe) => sync.spawn_probe(probe),
        None => output.message("API URL not configured; staying offline."),
    }
    if let Some(ref url) = app.config.realtime_url {
        sync.attach_realtime(RealtimeConfig::new(url.clone(), app.config.groups.clone()));
    }

    output.message(&format!(
        "Watching ({} pending). Press Ctrl-C to stop.",
        sync.pending_count()
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                output.print_event(&event);
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *connectivity.borrow_and_update();
                output.message(if online { "Online" } else { "Offline" });
            }
        }
    }

    sync.dispose();
    Ok(())
}
