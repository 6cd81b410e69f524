use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::ssh::Channel;

pub const BACKUP_SCRIPT: &str = "backup.sh";
pub const RESTORE_SCRIPT: &str = "restore.sh";

/// Handle on a backup archive created for one update attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub file_path: String,
}

/// What `backup.sh --format=json` and `restore.sh --format=json` print.
#[derive(Debug, Deserialize)]
struct ScriptReply {
    file: Option<String>,
    success: Option<bool>,
    error: Option<String>,
}

/// True when the compose directory ships an executable `backup.sh`.
pub async fn available<C: Channel>(channel: &C, host_dir: &str) -> Result<bool, UpdateError> {
    channel
        .is_executable(&format!("{}/{}", host_dir, BACKUP_SCRIPT))
        .await
}

/// Invoke `backup.sh` and parse its JSON contract. Anything but exit 0 plus
/// a `file` path is a failure.
pub async fn create<C: Channel>(
    channel: &C,
    host_dir: &str,
    timeout: Duration,
) -> Result<BackupRecord, UpdateError> {
    let cmd = format!("./{} --format=json", BACKUP_SCRIPT);
    let run = channel.execute(&cmd, Some(host_dir));
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| UpdateError::Timeout {
            phase: "backup",
            seconds: timeout.as_secs(),
        })??;

    if output.exit_code == 127 {
        // The script passed the executable probe but vanished before the
        // call, e.g. a checkout swapped the tree underneath us.
        return Err(UpdateError::BackupUnavailable(format!(
            "{} disappeared from {}",
            BACKUP_SCRIPT, host_dir
        )));
    }
    if !output.success() {
        return Err(UpdateError::BackupFailed(format!(
            "exit {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    let reply: ScriptReply = serde_json::from_str(output.stdout.trim())
        .map_err(|e| UpdateError::BackupFailed(format!("unparseable output: {}", e)))?;

    if reply.success == Some(false) {
        return Err(UpdateError::BackupFailed(
            reply.error.unwrap_or_else(|| "script reported failure".to_string()),
        ));
    }

    let file_path = reply
        .file
        .ok_or_else(|| UpdateError::BackupFailed("no backup file in output".to_string()))?;

    debug!("Backup created at {}", file_path);
    Ok(BackupRecord { file_path })
}

/// Invoke `restore.sh --file=… --format=json`.
pub async fn restore<C: Channel>(
    channel: &C,
    host_dir: &str,
    record: &BackupRecord,
    timeout: Duration,
) -> Result<(), UpdateError> {
    let failed = |error: String| UpdateError::RestoreFailed {
        backup: record.file_path.clone(),
        error,
    };

    let cmd = format!(
        "./{} --file=\"{}\" --format=json",
        RESTORE_SCRIPT, record.file_path
    );
    let run = channel.execute(&cmd, Some(host_dir));
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| {
            failed(format!("timed out after {} seconds", timeout.as_secs()))
        })??;

    if !output.success() {
        return Err(failed(format!(
            "exit {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    match serde_json::from_str::<ScriptReply>(output.stdout.trim()) {
        Ok(reply) if reply.success == Some(false) => Err(failed(
            reply.error.unwrap_or_else(|| "script reported failure".to_string()),
        )),
        Ok(_) => Ok(()),
        Err(e) => Err(failed(format!("unparseable output: {}", e))),
    }
}

/// Delete the archive after a fully committed update. Best effort: the
/// update already succeeded, a stale archive only costs disk.
pub async fn remove<C: Channel>(channel: &C, record: &BackupRecord) {
    match channel
        .execute(&format!("rm -f \"{}\"", record.file_path), None)
        .await
    {
        Ok(output) if output.success() => {}
        Ok(output) => warn!(
            "Could not remove backup {}: {}",
            record.file_path,
            output.stderr.trim()
        ),
        Err(e) => warn!("Could not remove backup {}: {}", record.file_path, e),
    }
}

fn backup_name_regex() -> &'static Regex {
    static BACKUP_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    BACKUP_NAME_REGEX
        .get_or_init(|| Regex::new(r"^backup-(\d{8}-\d{6})\.tar\.gz$").unwrap())
}

/// Timestamp encoded in `backup-YYYYMMDD-HHMMSS.tar.gz`. Names that do not
/// match the convention parse to the epoch so they sort last.
pub fn parse_backup_timestamp(file_name: &str) -> DateTime<Utc> {
    backup_name_regex()
        .captures(file_name)
        .and_then(|caps| NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d-%H%M%S").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// List backup archives in the compose directory, newest first.
pub async fn list<C: Channel>(
    channel: &C,
    host_dir: &str,
) -> Result<Vec<(String, DateTime<Utc>)>, UpdateError> {
    let output = channel
        .execute("ls -1 backup-*.tar.gz 2>/dev/null || true", Some(host_dir))
        .await?;

    let mut archives: Vec<(String, DateTime<Utc>)> = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|name| (name.to_string(), parse_backup_timestamp(name)))
        .collect();
    archives.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(archives)
}
