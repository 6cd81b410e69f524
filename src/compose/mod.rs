use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::error::UpdateError;
use crate::ssh::Channel;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// A service without a declared healthcheck counts as healthy once it has
/// been running this long without restarting.
const RUNNING_STABLE_FOR: Duration = Duration::from_secs(5);

/// Select the compose files for this host architecture: the base file, an
/// architecture overlay if one exists, and any overrides. Shorter names
/// sort first so bases precede overlays.
pub fn compose_files_for(compose_dir: &Path, architecture: &str) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(compose_dir) else {
        return Vec::new();
    };

    let arch_file = format!("docker-compose.{}.yml", architecture);
    let mut files: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| {
            name == "docker-compose.yml"
                || name == &arch_file
                || (name.starts_with("docker-compose.override") && name.ends_with(".yml"))
        })
        .collect();

    files.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    files
}

fn file_args(files: &[String]) -> String {
    files
        .iter()
        .map(|f| format!("-f {}", f))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `docker compose down`, synchronously.
pub async fn down<C: Channel>(
    channel: &C,
    host_dir: &str,
    files: &[String],
) -> Result<(), UpdateError> {
    let output = channel
        .execute(
            &format!("docker compose {} down", file_args(files)),
            Some(host_dir),
        )
        .await?;
    if !output.success() {
        return Err(UpdateError::ComposeDown(output.stderr.trim().to_string()));
    }
    Ok(())
}

/// `docker compose up -d` with the selected files. The command itself
/// returns once containers are created; health is judged separately.
pub async fn up<C: Channel>(
    channel: &C,
    host_dir: &str,
    files: &[String],
    timeout: Duration,
) -> Result<(), UpdateError> {
    let cmd = format!("docker compose {} up -d", file_args(files));
    let run = channel.execute(&cmd, Some(host_dir));
    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| UpdateError::Timeout {
            phase: "compose up",
            seconds: timeout.as_secs(),
        })??;
    if !output.success() {
        return Err(UpdateError::ComposeUp(output.stderr.trim().to_string()));
    }
    Ok(())
}

/// One service row from `docker compose ps --format json`.
#[derive(Debug, Clone, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeProjectStatus {
    pub status: String,
    pub config_files: Vec<String>,
    pub running_services: usize,
    pub total_services: usize,
}

/// Project status derived from `compose ps`.
pub async fn status<C: Channel>(
    channel: &C,
    host_dir: &str,
    files: &[String],
) -> Result<ComposeProjectStatus, UpdateError> {
    let services = ps(channel, host_dir).await?;
    let running = services.iter().filter(|s| s.state == "running").count();
    let total = services.len();
    let status = if total == 0 {
        "stopped"
    } else if running == total {
        "running"
    } else if running > 0 {
        "degraded"
    } else {
        "stopped"
    };
    Ok(ComposeProjectStatus {
        status: status.to_string(),
        config_files: files.to_vec(),
        running_services: running,
        total_services: total,
    })
}

async fn ps<C: Channel>(channel: &C, host_dir: &str) -> Result<Vec<PsEntry>, UpdateError> {
    let output = channel
        .execute("docker compose ps --all --format json", Some(host_dir))
        .await?;
    if !output.success() {
        return Err(UpdateError::SshExec(format!(
            "compose ps failed: {}",
            output.stderr.trim()
        )));
    }
    parse_ps(&output.stdout)
}

/// Compose prints one JSON object per line since v2.21; older releases
/// printed a single array. Accept both.
fn parse_ps(stdout: &str) -> Result<Vec<PsEntry>, UpdateError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| UpdateError::Unexpected(format!("compose ps output: {}", e)));
    }
    trimmed
        .lines()
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| UpdateError::Unexpected(format!("compose ps output: {}", e)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHealth {
    pub state: String,
    pub healthy: bool,
    /// A failing declared healthcheck marks the service critical; a service
    /// that merely is not running (no healthcheck) is degraded but
    /// tolerable.
    pub critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthCheckResult {
    pub all_healthy: bool,
    pub services: BTreeMap<String, ServiceHealth>,
    pub critical_failure: bool,
}

/// Poll the project until every service is healthy or the timeout elapses.
/// Returns the last observation either way; the caller decides what an
/// unhealthy set means.
pub async fn health_check<C: Channel>(
    channel: &C,
    host_dir: &str,
    timeout: Duration,
) -> Result<HealthCheckResult, UpdateError> {
    let deadline = Instant::now() + timeout;
    let mut running_since: BTreeMap<String, Instant> = BTreeMap::new();

    loop {
        let entries = ps(channel, host_dir).await?;
        let now = Instant::now();

        let mut services = BTreeMap::new();
        for entry in &entries {
            let stable = if entry.state == "running" {
                let since = *running_since.entry(entry.service.clone()).or_insert(now);
                now.duration_since(since) >= RUNNING_STABLE_FOR
            } else {
                running_since.remove(&entry.service);
                false
            };

            let healthy = match entry.health.as_str() {
                "healthy" => true,
                "" => stable,
                _ => false,
            };
            let critical = entry.health == "unhealthy";

            services.insert(
                entry.service.clone(),
                ServiceHealth {
                    state: entry.state.clone(),
                    healthy,
                    critical,
                },
            );
        }

        let all_healthy = !services.is_empty() && services.values().all(|s| s.healthy);
        let critical_failure = services.values().any(|s| s.critical);

        if all_healthy {
            return Ok(HealthCheckResult {
                all_healthy,
                services,
                critical_failure,
            });
        }

        if Instant::now() >= deadline {
            debug!("Health check window elapsed with unhealthy services");
            return Ok(HealthCheckResult {
                all_healthy,
                services,
                critical_failure,
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(HEALTH_POLL_INTERVAL.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_files_sorted_base_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "docker-compose.override.yml",
            "docker-compose.yml",
            "docker-compose.aarch64.yml",
            "docker-compose.x86_64.yml",
            "README.md",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let files = compose_files_for(dir.path(), "x86_64");
        assert_eq!(
            files,
            vec![
                "docker-compose.yml",
                "docker-compose.x86_64.yml",
                "docker-compose.override.yml",
            ]
        );
    }

    #[test]
    fn test_compose_files_skip_foreign_architecture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "").unwrap();
        std::fs::write(dir.path().join("docker-compose.aarch64.yml"), "").unwrap();

        let files = compose_files_for(dir.path(), "x86_64");
        assert_eq!(files, vec!["docker-compose.yml"]);
    }

    #[test]
    fn test_parse_ps_ndjson() {
        let stdout = concat!(
            "{\"Service\":\"api\",\"State\":\"running\",\"Health\":\"healthy\"}\n",
            "{\"Service\":\"worker\",\"State\":\"exited\",\"Health\":\"\"}\n",
        );
        let entries = parse_ps(stdout).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "api");
        assert_eq!(entries[1].state, "exited");
    }

    #[test]
    fn test_parse_ps_array_form() {
        let stdout = "[{\"Service\":\"api\",\"State\":\"running\",\"Health\":\"healthy\"}]";
        let entries = parse_ps(stdout).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_parse_ps_empty() {
        assert!(parse_ps("").unwrap().is_empty());
        assert!(parse_ps("\n").unwrap().is_empty());
    }

    #[test]
    fn test_file_args_orders_flags() {
        let files = vec![
            "docker-compose.yml".to_string(),
            "docker-compose.override.yml".to_string(),
        ];
        assert_eq!(
            file_args(&files),
            "-f docker-compose.yml -f docker-compose.override.yml"
        );
    }
}
