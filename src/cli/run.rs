use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use crate::config::RefitConfig;
use crate::events::{Event, EventBus};
use crate::git::GitCli;
use crate::output;
use crate::registry::PackageRegistry;
use crate::scheduler::Scheduler;
use crate::ssh::SshChannel;
use crate::update::CancelFlag;

/// The daemon: scan and update until interrupted.
pub async fn run(config: RefitConfig) -> Result<()> {
    preflight()?;

    let registry = PackageRegistry::from_config(&config);
    if registry.is_empty() {
        bail!("No packages configured — nothing to watch");
    }

    output::header("refit");
    output::info(&format!(
        "Watching {} package(s) on {} every {}s",
        registry.len(),
        config.ssh.host,
        config.poll_interval_seconds
    ));

    let channel = Arc::new(SshChannel::new(config.ssh.clone()));
    let git = Arc::new(GitCli::new());
    let events = EventBus::new();
    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));

    tokio::spawn(narrate(events.clone()));

    let scheduler = Scheduler::new(
        channel,
        git,
        registry,
        events,
        config.timeouts,
        Duration::from_secs(config.poll_interval_seconds),
        cancel.clone(),
    );
    let worker = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    output::warning("Interrupt received — finishing the current phase, not starting new ones");
    cancel.store(true, Ordering::Relaxed);

    // Let whatever phase is in flight run to its boundary before exiting.
    worker.await.context("Scheduler task panicked")?;

    Ok(())
}

/// Mirror bus events onto the console so an attended daemon is readable.
async fn narrate(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            // Falling behind loses old events, never the daemon.
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        };
        match event {
            Event::UpdateStarted { package, from, to } => {
                output::info(&format!("{}: updating {} -> {}", package, from, to));
            }
            Event::UpdateProgress {
                package, operation, ..
            } => {
                info!("{}: {}", package, operation);
            }
            Event::UpdateCompleted {
                package,
                success: true,
                error: None,
            } => {
                output::success(&format!("{}: update complete", package));
            }
            Event::UpdateCompleted {
                package,
                success: true,
                error: Some(warning),
            } => {
                output::warning(&format!("{}: {}", package, warning));
            }
            Event::UpdateCompleted {
                package,
                success: false,
                error,
            } => {
                output::error(&format!(
                    "{}: {}",
                    package,
                    error.unwrap_or_else(|| "update failed".to_string())
                ));
            }
            Event::VersionCheckCompleted { .. } | Event::PackageStatusChanged { .. } => {}
        }
    }
}

/// Everything refit shells out to must exist before we start a cycle.
pub fn preflight() -> Result<()> {
    for binary in ["git", "ssh"] {
        which::which(binary)
            .with_context(|| format!("'{}' not found on PATH — refit needs it", binary))?;
    }
    Ok(())
}
