mod rollback;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::backup::{self, BackupRecord};
use crate::compose::{self, HealthCheckResult};
use crate::config::{PackageConfig, TimeoutConfig};
use crate::error::UpdateError;
use crate::events::{Event, EventBus};
use crate::git::GitProvider;
use crate::migrate::{self, MigrationScript};
use crate::ssh::Channel;
use crate::state::DeploymentState;
use crate::version::PackageVersion;

/// Cooperative cancellation flag checked at phase boundaries. In-flight
/// remote commands are never killed; the remote side owns them.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Success,
    /// Version advanced but some non-critical services are unhealthy and no
    /// backup was available to roll back.
    PartialSuccess,
    Failed,
    /// Rollback itself failed; manual recovery with the surfaced backup
    /// path is required.
    RecoverableFailure,
}

/// Outcome of one update attempt, success or not.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub status: UpdateStatus,
    pub from: PackageVersion,
    pub to: PackageVersion,
    pub executed_scripts: Vec<String>,
    pub error: Option<String>,
    pub health: Option<HealthCheckResult>,
    pub backup: Option<String>,
    pub recovery_performed: bool,
}

impl UpdateReport {
    fn new(from: &PackageVersion, to: &PackageVersion) -> Self {
        Self {
            status: UpdateStatus::Success,
            from: from.clone(),
            to: to.clone(),
            executed_scripts: Vec::new(),
            error: None,
            health: None,
            backup: None,
            recovery_performed: false,
        }
    }
}

/// Drives one package from its deployed version to a target version:
/// backup → stop → migrate → checkout → start → health → commit, with
/// automatic rollback whenever a backup exists and a phase fails.
pub struct Orchestrator<'a, C: Channel, G: GitProvider> {
    channel: &'a C,
    git: &'a G,
    package: &'a PackageConfig,
    events: EventBus,
    timeouts: TimeoutConfig,
    cancel: CancelFlag,
}

impl<'a, C: Channel, G: GitProvider> Orchestrator<'a, C, G> {
    pub fn new(
        channel: &'a C,
        git: &'a G,
        package: &'a PackageConfig,
        events: EventBus,
        timeouts: TimeoutConfig,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            channel,
            git,
            package,
            events,
            timeouts,
            cancel,
        }
    }

    fn local_dir(&self) -> PathBuf {
        self.package.compose_dir()
    }

    fn progress(&self, operation: &str, percent: u8) {
        self.events.publish(Event::UpdateProgress {
            package: self.package.package_name(),
            operation: operation.to_string(),
            percent,
        });
    }

    fn check_cancelled(&self) -> Result<(), UpdateError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    /// Run a full update attempt towards `target`. `Err` is returned only
    /// when the attempt could not start at all (state file unreadable, or
    /// cancellation before the first phase); every outcome once phases run
    /// is an [`UpdateReport`].
    pub async fn update(&self, target: &PackageVersion) -> Result<UpdateReport, UpdateError> {
        let local_dir = self.local_dir();
        let mut state = DeploymentState::load(&local_dir)?;
        let from = state.version.clone();

        if *target == from {
            debug!("{} already at {}, nothing to do", self.package.name, target);
            return Ok(UpdateReport::new(&from, target));
        }

        self.events.publish(Event::UpdateStarted {
            package: self.package.package_name(),
            from: from.clone(),
            to: target.clone(),
        });

        let host_dir = self.package.host_compose_dir();
        let arch = match self.channel.architecture().await {
            Ok(arch) => arch,
            Err(e) => return Ok(self.fail_no_recovery(&from, target, e)),
        };
        // Snapshot the old revision's compose files before checkout swaps
        // the tree; the new revision may not define the same services.
        let old_files = compose::compose_files_for(&local_dir, &arch);

        // Phase 1: backup. Nothing has been touched yet, so a failure here
        // is terminal but clean.
        self.check_cancelled()?;
        self.progress("backing up", 5);
        let backup = match self.take_backup(&host_dir).await {
            Ok(record) => record,
            Err(e) => return Ok(self.fail_no_recovery(&from, target, e)),
        };

        let mut executed: Vec<MigrationScript> = Vec::new();
        let outcome = self
            .mutate(target, &from, &mut state, &mut executed, &backup, &host_dir, &arch, &old_files)
            .await;

        match outcome {
            Ok(report) => Ok(report),
            Err(cause) => {
                warn!("Update of {} failed: {}", self.package.name, cause);
                match &backup {
                    Some(record) => Ok(rollback::run(
                        self, cause, &from, target, &mut state, &executed, record, &host_dir,
                        &old_files,
                    )
                    .await),
                    None => Ok(self.fail_no_recovery_with_scripts(&from, target, cause, &executed)),
                }
            }
        }
    }

    async fn take_backup(&self, host_dir: &str) -> Result<Option<BackupRecord>, UpdateError> {
        if !backup::available(self.channel, host_dir).await? {
            debug!("No backup.sh in {}, proceeding without safety net", host_dir);
            return Ok(None);
        }
        let record = backup::create(
            self.channel,
            host_dir,
            Duration::from_secs(self.timeouts.backup_seconds),
        )
        .await?;
        Ok(Some(record))
    }

    /// Phases 2–7. Any error bubbles to the rollback decision in `update`.
    #[allow(clippy::too_many_arguments)]
    async fn mutate(
        &self,
        target: &PackageVersion,
        from: &PackageVersion,
        state: &mut DeploymentState,
        executed: &mut Vec<MigrationScript>,
        backup: &Option<BackupRecord>,
        host_dir: &str,
        arch: &str,
        old_files: &[String],
    ) -> Result<UpdateReport, UpdateError> {
        let local_dir = self.local_dir();

        // Phase 2: stop the old version.
        self.check_cancelled()?;
        self.progress("stopping services", 20);
        compose::down(self.channel, host_dir, old_files).await?;

        // Phase 3: migrations.
        self.check_cancelled()?;
        self.progress("running migrations", 35);
        let scripts = migrate::discover(&local_dir)?;
        let selected = migrate::select(&scripts, from, target, &state.up);
        migrate::run_scripts(
            self.channel,
            host_dir,
            &selected,
            state,
            executed,
            Duration::from_secs(self.timeouts.migration_script_seconds),
        )
        .await?;

        // Phase 4: checkout the target revision.
        self.check_cancelled()?;
        self.progress("checking out", 55);
        self.git
            .checkout(&self.package.repository_location, target)?;

        // Phase 5: start the new version.
        self.check_cancelled()?;
        self.progress("starting services", 70);
        let new_files = compose::compose_files_for(&local_dir, arch);
        compose::up(
            self.channel,
            host_dir,
            &new_files,
            Duration::from_secs(self.timeouts.compose_up_seconds),
        )
        .await?;

        // Phase 6: health.
        self.check_cancelled()?;
        self.progress("health checking", 85);
        let health = compose::health_check(
            self.channel,
            host_dir,
            Duration::from_secs(self.timeouts.health_seconds),
        )
        .await?;

        if !health.all_healthy {
            let unhealthy: Vec<String> = health
                .services
                .iter()
                .filter(|(_, s)| !s.healthy)
                .map(|(name, _)| name.clone())
                .collect();

            if health.services.is_empty() {
                return Err(UpdateError::HealthTimeout(self.timeouts.health_seconds));
            }
            if health.critical_failure && backup.is_some() {
                return Err(UpdateError::CriticalServicesUnhealthy(unhealthy));
            }

            // Keep what runs: commit the version with the partial flag and
            // surface the unhealthy set.
            return Ok(self.commit(target, from, state, executed, backup, Some(health), true).await?);
        }

        // Phase 7: commit.
        self.check_cancelled()?;
        self.progress("committing", 95);
        self.commit(target, from, state, executed, backup, Some(health), false)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        target: &PackageVersion,
        from: &PackageVersion,
        state: &mut DeploymentState,
        executed: &[MigrationScript],
        backup: &Option<BackupRecord>,
        health: Option<HealthCheckResult>,
        partial: bool,
    ) -> Result<UpdateReport, UpdateError> {
        state.version = target.clone();
        state.updated = Utc::now();
        state.partial = partial;
        state.save(&self.local_dir())?;

        if let Some(record) = backup {
            backup::remove(self.channel, record).await;
        }

        let unhealthy_note = health.as_ref().filter(|_| partial).map(|h| {
            let names: Vec<String> = h
                .services
                .iter()
                .filter(|(_, s)| !s.healthy)
                .map(|(name, _)| name.clone())
                .collect();
            format!("services unhealthy after update: {}", names.join(", "))
        });

        self.events.publish(Event::UpdateCompleted {
            package: self.package.package_name(),
            success: true,
            error: unhealthy_note.clone(),
        });
        self.events.publish(Event::PackageStatusChanged {
            package: self.package.package_name(),
            version: target.clone(),
        });

        let mut report = UpdateReport::new(from, target);
        report.status = if partial {
            UpdateStatus::PartialSuccess
        } else {
            UpdateStatus::Success
        };
        report.executed_scripts = executed.iter().map(|s| s.file_name.clone()).collect();
        report.error = unhealthy_note;
        report.health = health;
        report.backup = backup.as_ref().map(|b| b.file_path.clone());
        Ok(report)
    }

    fn fail_no_recovery(
        &self,
        from: &PackageVersion,
        to: &PackageVersion,
        cause: UpdateError,
    ) -> UpdateReport {
        self.fail_no_recovery_with_scripts(from, to, cause, &[])
    }

    /// Terminal failure without a backup to fall back on. No rollback is
    /// attempted and no checkout back to `from` happens; the host is left
    /// for the operator.
    fn fail_no_recovery_with_scripts(
        &self,
        from: &PackageVersion,
        to: &PackageVersion,
        cause: UpdateError,
        executed: &[MigrationScript],
    ) -> UpdateReport {
        self.events.publish(Event::UpdateCompleted {
            package: self.package.package_name(),
            success: false,
            error: Some(cause.to_string()),
        });

        let mut report = UpdateReport::new(from, to);
        report.status = UpdateStatus::Failed;
        report.executed_scripts = executed.iter().map(|s| s.file_name.clone()).collect();
        report.error = Some(cause.to_string());
        report.recovery_performed = false;
        report
    }

    pub(crate) fn channel(&self) -> &C {
        self.channel
    }

    pub(crate) fn git(&self) -> &G {
        self.git
    }

    pub(crate) fn package(&self) -> &PackageConfig {
        self.package
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }
}
