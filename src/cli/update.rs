use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::RefitConfig;
use crate::events::{Event, EventBus};
use crate::git::{GitCli, GitProvider};
use crate::output;
use crate::ssh::SshChannel;
use crate::state::DeploymentState;
use crate::update::{Orchestrator, UpdateReport, UpdateStatus};
use crate::version::PackageVersion;

pub async fn run(config: RefitConfig, package: &str, version: Option<&str>) -> Result<()> {
    super::run::preflight()?;

    let pkg = config.package(package)?;
    let channel = SshChannel::new(config.ssh.clone());
    let git = GitCli::new();

    git.ensure_cloned(&pkg.repository_url, &pkg.repository_location)?;
    git.fetch_tags(&pkg.repository_location)?;

    let target = match version {
        Some(raw) => PackageVersion::try_parse(raw)
            .with_context(|| format!("'{}' is not a valid version", raw))?,
        None => git
            .list_versions(&pkg.repository_location)?
            .into_iter()
            .next()
            .context("Repository has no version tags")?,
    };

    let current = DeploymentState::load(&pkg.compose_dir())?.version;
    output::header(&format!("Updating {} ({} -> {})", pkg.name, current, target));

    let events = EventBus::new();
    tokio::spawn(show_progress(events.clone()));

    let orchestrator = Orchestrator::new(
        &channel,
        &git,
        pkg,
        events.clone(),
        config.timeouts,
        Arc::new(AtomicBool::new(false)),
    );
    let report = orchestrator.update(&target).await?;

    print_report(&report)
}

async fn show_progress(events: EventBus) {
    let mut rx = events.subscribe();
    while let Ok(event) = rx.recv().await {
        if let Event::UpdateProgress { operation, .. } = event {
            output::phase(&operation);
        }
    }
}

pub fn print_report(report: &UpdateReport) -> Result<()> {
    for script in &report.executed_scripts {
        output::kv("migration", script);
    }

    match report.status {
        UpdateStatus::Success => {
            output::success(&format!("{} -> {}", report.from, report.to));
            Ok(())
        }
        UpdateStatus::PartialSuccess => {
            output::warning(&format!(
                "{} -> {}, but: {}",
                report.from,
                report.to,
                report.error.as_deref().unwrap_or("some services unhealthy")
            ));
            Ok(())
        }
        UpdateStatus::Failed if report.recovery_performed => {
            bail!(
                "Update failed and was rolled back to {}: {}",
                report.from,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        UpdateStatus::Failed => {
            bail!(
                "Update failed with no backup to roll back to: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        UpdateStatus::RecoverableFailure => {
            if let Some(backup) = &report.backup {
                output::error(&format!("Backup retained at {}", backup));
            }
            bail!(
                "Rollback failed — manual recovery required: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
