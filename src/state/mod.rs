use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::version::PackageVersion;

pub const STATE_FILE: &str = "deployment.state.json";

/// Durable per-package record of what is live on the host and which
/// migration scripts have run. Lives next to the compose files so it
/// travels with the deployment, not with refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(rename = "Version")]
    pub version: PackageVersion,
    #[serde(rename = "Updated")]
    pub updated: DateTime<Utc>,
    /// Versions whose up script has been applied. BTreeSet keeps the
    /// serialized array sorted so state diffs stay stable.
    #[serde(rename = "Up", default)]
    pub up: BTreeSet<PackageVersion>,
    /// Versions whose script execution failed at least once. Audit only.
    #[serde(rename = "Failed", default)]
    pub failed: BTreeSet<PackageVersion>,
    /// Set when the version advanced while some non-critical services
    /// stayed unhealthy.
    #[serde(rename = "Partial", default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

impl Default for DeploymentState {
    fn default() -> Self {
        Self {
            version: PackageVersion::Empty,
            updated: DateTime::<Utc>::UNIX_EPOCH,
            up: BTreeSet::new(),
            failed: BTreeSet::new(),
            partial: false,
        }
    }
}

impl DeploymentState {
    /// Load from `<compose_dir>/deployment.state.json`. A missing file is a
    /// first deploy and yields the default state.
    pub fn load(compose_dir: &Path) -> Result<Self, UpdateError> {
        let path = compose_dir.join(STATE_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(UpdateError::StateIo(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&content)
            .map_err(|e| UpdateError::StateIo(format!("{}: {}", path.display(), e)))
    }

    /// Persist atomically: write a temp file, fsync, rename over the
    /// destination. A crash leaves either the old state or the new one.
    pub fn save(&self, compose_dir: &Path) -> Result<(), UpdateError> {
        let path = compose_dir.join(STATE_FILE);
        let tmp = compose_dir.join(format!("{}.tmp", STATE_FILE));

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::StateIo(e.to_string()))?;

        let mut file = File::create(&tmp)
            .map_err(|e| UpdateError::StateIo(format!("{}: {}", tmp.display(), e)))?;
        file.write_all(content.as_bytes())
            .map_err(|e| UpdateError::StateIo(format!("{}: {}", tmp.display(), e)))?;
        file.sync_all()
            .map_err(|e| UpdateError::StateIo(format!("{}: {}", tmp.display(), e)))?;
        drop(file);

        std::fs::rename(&tmp, &path)
            .map_err(|e| UpdateError::StateIo(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}
