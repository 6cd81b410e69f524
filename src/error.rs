use thiserror::Error;

use crate::version::PackageVersion;

/// Failure kinds the orchestrator makes transition decisions on. Everything
/// above the update core wraps these in `anyhow` for reporting.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("ssh connection failed: {0}")]
    SshConnect(String),

    #[error("ssh authentication rejected: {0}")]
    SshAuth(String),

    #[error("ssh command failed mid-flight: {0}")]
    SshExec(String),

    #[error("git clone failed: {0}")]
    GitClone(String),

    #[error("git fetch failed: {0}")]
    GitFetch(String),

    #[error("tag for version {0} not found in repository")]
    GitTagMissing(PackageVersion),

    #[error("git checkout failed: {0}")]
    GitCheckout(String),

    #[error("no backup available: {0}")]
    BackupUnavailable(String),

    #[error("backup script produced no usable backup: {0}")]
    BackupFailed(String),

    #[error("restore from {backup} failed: {error}")]
    RestoreFailed { backup: String, error: String },

    #[error("migration {script} failed: {stderr}")]
    MigrationFailed { script: String, stderr: String },

    #[error("docker compose down failed: {0}")]
    ComposeDown(String),

    #[error("docker compose up failed: {0}")]
    ComposeUp(String),

    #[error("services did not become healthy within {0} seconds")]
    HealthTimeout(u64),

    #[error("critical services unhealthy: {}", .0.join(", "))]
    CriticalServicesUnhealthy(Vec<String>),

    #[error("deployment state i/o: {0}")]
    StateIo(String),

    #[error("{phase} timed out after {seconds} seconds")]
    Timeout { phase: &'static str, seconds: u64 },

    #[error("update cancelled")]
    Cancelled,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}
