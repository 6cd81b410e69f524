use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::backup::{self, BackupRecord};
use crate::compose;
use crate::error::UpdateError;
use crate::events::Event;
use crate::git::GitProvider;
use crate::migrate::{self, MigrationScript};
use crate::ssh::Channel;
use crate::state::DeploymentState;
use crate::version::PackageVersion;

use super::{Orchestrator, UpdateReport, UpdateStatus};

/// The rollback sub-machine: stop everything, walk back the migrations
/// applied in this attempt, restore the backup, and restart the previous
/// version. Only restore and restart can escalate to a recoverable
/// failure; everything before them is best effort.
#[allow(clippy::too_many_arguments)]
pub(super) async fn run<C: Channel, G: GitProvider>(
    orch: &Orchestrator<'_, C, G>,
    cause: UpdateError,
    from: &PackageVersion,
    to: &PackageVersion,
    state: &mut DeploymentState,
    executed: &[MigrationScript],
    record: &BackupRecord,
    host_dir: &str,
    old_files: &[String],
) -> UpdateReport {
    let package = orch.package();
    let local_dir = package.compose_dir();
    debug!("Rolling back {} to {}", package.name, from);

    // Stop whatever the failed attempt left running. The tree may already
    // hold the new revision's files at this point.
    orch.events().publish(progress(orch, "rollback: stopping services", 10));
    if let Err(e) = compose::down(orch.channel(), host_dir, old_files).await {
        warn!("compose down during rollback: {}", e);
    }

    // Undo the migrations of this attempt, newest first. Failures are
    // recorded in the state and skipped.
    orch.events().publish(progress(orch, "rollback: reversing migrations", 35));
    let all_scripts = match migrate::discover(&local_dir) {
        Ok(scripts) => scripts,
        Err(e) => {
            warn!("script discovery during rollback: {}", e);
            Vec::new()
        }
    };
    migrate::run_down_for(
        orch.channel(),
        host_dir,
        &all_scripts,
        executed,
        state,
        Duration::from_secs(orch.timeouts().migration_script_seconds),
    )
    .await;

    // Restore the backup. This is the step that must not fail silently.
    orch.events().publish(progress(orch, "rollback: restoring backup", 60));
    if let Err(e) = backup::restore(
        orch.channel(),
        host_dir,
        record,
        Duration::from_secs(orch.timeouts().backup_seconds),
    )
    .await
    {
        return recoverable(orch, cause, e, from, to, executed, record);
    }

    // Put the previous revision back and start it. A first deploy has no
    // previous revision to return to.
    orch.events().publish(progress(orch, "rollback: restarting previous version", 80));
    if !from.is_empty() {
        if let Err(e) = orch.git().checkout(&package.repository_location, from) {
            return recoverable(orch, cause, e, from, to, executed, record);
        }
        if let Err(e) = compose::up(
            orch.channel(),
            host_dir,
            old_files,
            Duration::from_secs(orch.timeouts().compose_up_seconds),
        )
        .await
        {
            return recoverable(orch, cause, e, from, to, executed, record);
        }
    }

    // Rollback completed: persist the restored version.
    state.version = from.clone();
    state.updated = Utc::now();
    state.partial = false;
    if let Err(e) = state.save(&local_dir) {
        return recoverable(orch, cause, e, from, to, executed, record);
    }

    orch.events().publish(Event::UpdateCompleted {
        package: package.package_name(),
        success: false,
        error: Some(cause.to_string()),
    });
    orch.events().publish(Event::PackageStatusChanged {
        package: package.package_name(),
        version: from.clone(),
    });

    let mut report = UpdateReport::new(from, to);
    report.status = UpdateStatus::Failed;
    report.executed_scripts = executed.iter().map(|s| s.file_name.clone()).collect();
    report.error = Some(cause.to_string());
    report.backup = Some(record.file_path.clone());
    report.recovery_performed = true;
    report
}

fn progress<C: Channel, G: GitProvider>(
    orch: &Orchestrator<'_, C, G>,
    operation: &str,
    percent: u8,
) -> Event {
    Event::UpdateProgress {
        package: orch.package().package_name(),
        operation: operation.to_string(),
        percent,
    }
}

/// Rollback itself failed. Surface the backup path for manual recovery and
/// leave the durable state untouched.
fn recoverable<C: Channel, G: GitProvider>(
    orch: &Orchestrator<'_, C, G>,
    cause: UpdateError,
    rollback_error: impl std::fmt::Display,
    from: &PackageVersion,
    to: &PackageVersion,
    executed: &[MigrationScript],
    record: &BackupRecord,
) -> UpdateReport {
    let message = format!(
        "{}; rollback failed: {}; manual restore required from {}",
        cause, rollback_error, record.file_path
    );
    warn!("{}", message);

    orch.events().publish(Event::UpdateCompleted {
        package: orch.package().package_name(),
        success: false,
        error: Some(message.clone()),
    });

    let mut report = UpdateReport::new(from, to);
    report.status = UpdateStatus::RecoverableFailure;
    report.executed_scripts = executed.iter().map(|s| s.file_name.clone()).collect();
    report.error = Some(message);
    report.backup = Some(record.file_path.clone());
    report.recovery_performed = false;
    report
}
