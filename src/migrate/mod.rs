use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::UpdateError;
use crate::ssh::Channel;
use crate::state::DeploymentState;
use crate::version::PackageVersion;

fn script_regex() -> &'static Regex {
    static SCRIPT_REGEX: OnceLock<Regex> = OnceLock::new();
    SCRIPT_REGEX.get_or_init(|| {
        Regex::new(r"^(up|down)-(v?\d+\.\d+\.\d+(?:-[A-Za-z0-9.\-]+)?)\.sh$").unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A migration script discovered in the compose directory. Version and
/// direction come from the filename alone.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationScript {
    pub file_name: String,
    pub version: PackageVersion,
    pub direction: Direction,
}

impl MigrationScript {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let caps = script_regex().captures(file_name)?;
        let direction = match &caps[1] {
            "up" => Direction::Up,
            _ => Direction::Down,
        };
        Some(Self {
            file_name: file_name.to_string(),
            version: PackageVersion::try_parse(&caps[2])?,
            direction,
        })
    }
}

/// Scan the local compose directory for `up-X.Y.Z.sh` / `down-X.Y.Z.sh`.
pub fn discover(compose_dir: &Path) -> Result<Vec<MigrationScript>, UpdateError> {
    let mut scripts = Vec::new();
    let entries = std::fs::read_dir(compose_dir)
        .map_err(|e| UpdateError::StateIo(format!("{}: {}", compose_dir.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| UpdateError::StateIo(e.to_string()))?;
        let name = entry.file_name();
        if let Some(script) = MigrationScript::from_file_name(&name.to_string_lossy()) {
            scripts.push(script);
        }
    }
    Ok(scripts)
}

/// Select the scripts to run for a `from` → `to` transition.
///
/// Upgrades take up scripts with `from < version <= to` that are not yet in
/// the applied set, ascending. Downgrades take down scripts with
/// `to < version <= from` that ARE in the applied set, descending. Equal
/// versions select nothing.
pub fn select(
    scripts: &[MigrationScript],
    from: &PackageVersion,
    to: &PackageVersion,
    applied: &BTreeSet<PackageVersion>,
) -> Vec<MigrationScript> {
    let mut selected: Vec<MigrationScript> = match to.cmp(from) {
        std::cmp::Ordering::Greater => scripts
            .iter()
            .filter(|s| {
                s.direction == Direction::Up
                    && s.version > *from
                    && s.version <= *to
                    && !applied.contains(&s.version)
            })
            .cloned()
            .collect(),
        std::cmp::Ordering::Less => scripts
            .iter()
            .filter(|s| {
                s.direction == Direction::Down
                    && s.version > *to
                    && s.version <= *from
                    && applied.contains(&s.version)
            })
            .cloned()
            .collect(),
        std::cmp::Ordering::Equal => Vec::new(),
    };

    selected.sort_by(|a, b| a.version.cmp(&b.version));
    if to < from {
        selected.reverse();
    }
    selected
}

/// Run `scripts` in order through the channel with the compose directory as
/// working directory. Successfully applied scripts are appended to
/// `executed` and reflected in `state.Up`; the first failure records the
/// version in `state.Failed` and stops the sequence.
pub async fn run_scripts<C: Channel>(
    channel: &C,
    host_dir: &str,
    scripts: &[MigrationScript],
    state: &mut DeploymentState,
    executed: &mut Vec<MigrationScript>,
    timeout: Duration,
) -> Result<(), UpdateError> {
    for script in scripts {
        debug!("Running migration {}", script.file_name);
        channel
            .make_executable(&format!("{}/{}", host_dir, script.file_name))
            .await?;

        let cmd = format!("./{}", script.file_name);
        let run = channel.execute(&cmd, Some(host_dir));
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                state.failed.insert(script.version.clone());
                return Err(UpdateError::Timeout {
                    phase: "migration script",
                    seconds: timeout.as_secs(),
                });
            }
        };

        if !output.success() {
            state.failed.insert(script.version.clone());
            return Err(UpdateError::MigrationFailed {
                script: script.file_name.clone(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        match script.direction {
            Direction::Up => {
                state.up.insert(script.version.clone());
            }
            Direction::Down => {
                state.up.remove(&script.version);
            }
        }
        executed.push(script.clone());
    }
    Ok(())
}

/// Rollback counterpart: run the down scripts for the versions applied
/// during this update, in reverse order. Per-script failures are recorded
/// and logged but do not stop the walk; a partial rollback still beats
/// none.
pub async fn run_down_for<C: Channel>(
    channel: &C,
    host_dir: &str,
    all_scripts: &[MigrationScript],
    applied: &[MigrationScript],
    state: &mut DeploymentState,
    timeout: Duration,
) {
    for done in applied.iter().rev() {
        let Some(down) = all_scripts
            .iter()
            .find(|s| s.direction == Direction::Down && s.version == done.version)
        else {
            debug!("No down script for {}", done.version);
            continue;
        };

        let mut executed = Vec::new();
        if let Err(e) = run_scripts(
            channel,
            host_dir,
            std::slice::from_ref(down),
            state,
            &mut executed,
            timeout,
        )
        .await
        {
            warn!("Down script {} failed during rollback: {}", down.file_name, e);
            // Its up version stays in state.Up and lands in Failed via
            // run_scripts; keep walking.
        }
    }
}
