use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::UpdateError;
use crate::version::PackageVersion;

/// Tag listings are cached briefly so the scheduler loop does not hammer
/// the local tree (and `describe`) every scan.
const TAG_CACHE_TTL: Duration = Duration::from_secs(10);

/// Local git operations the update machinery needs. All calls are
/// synchronous with respect to the caller.
pub trait GitProvider {
    /// Clone `url` into `path` unless `path/.git` already exists.
    fn ensure_cloned(&self, url: &str, path: &Path) -> Result<(), UpdateError>;

    /// Fetch all remote refs, forcing tag updates.
    fn fetch_tags(&self, path: &Path) -> Result<(), UpdateError>;

    /// Every tag that parses as a version, sorted descending.
    fn list_versions(&self, path: &Path) -> Result<Vec<PackageVersion>, UpdateError>;

    /// The tag HEAD sits on, or `Empty` when HEAD is untagged.
    fn current_version(&self, path: &Path) -> Result<PackageVersion, UpdateError>;

    /// Hard checkout of the commit the version's tag points at.
    fn checkout(&self, path: &Path, version: &PackageVersion) -> Result<(), UpdateError>;
}

/// [`GitProvider`] shelling out to the `git` binary.
#[derive(Default)]
pub struct GitCli {
    tag_cache: Mutex<HashMap<PathBuf, (Instant, Vec<PackageVersion>)>>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw_tags(&self, path: &Path) -> Result<Vec<String>, UpdateError> {
        let output = run_git(Some(path), &["tag", "--list"])
            .map_err(|e| UpdateError::GitFetch(e.to_string()))?;
        if !output.status.success() {
            return Err(UpdateError::GitFetch(stderr_of(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Find the raw tag name (`v1.2.0` vs `1.2.0`) for a parsed version.
    fn tag_for(&self, path: &Path, version: &PackageVersion) -> Result<Option<String>, UpdateError> {
        Ok(self
            .raw_tags(path)?
            .into_iter()
            .find(|tag| PackageVersion::try_parse(tag).as_ref() == Some(version)))
    }
}

impl GitProvider for GitCli {
    fn ensure_cloned(&self, url: &str, path: &Path) -> Result<(), UpdateError> {
        if path.join(".git").exists() {
            return Ok(());
        }
        debug!("Cloning {} into {}", url, path.display());
        let output = run_git(
            None,
            &["clone", url, &path.to_string_lossy()],
        )
        .map_err(|e| UpdateError::GitClone(e.to_string()))?;
        if !output.status.success() {
            return Err(UpdateError::GitClone(stderr_of(&output)));
        }
        Ok(())
    }

    fn fetch_tags(&self, path: &Path) -> Result<(), UpdateError> {
        let output = run_git(Some(path), &["fetch", "--tags", "--force", "origin"])
            .map_err(|e| UpdateError::GitFetch(e.to_string()))?;
        if !output.status.success() {
            return Err(UpdateError::GitFetch(stderr_of(&output)));
        }
        Ok(())
    }

    fn list_versions(&self, path: &Path) -> Result<Vec<PackageVersion>, UpdateError> {
        {
            let cache = self.tag_cache.lock().unwrap();
            if let Some((at, versions)) = cache.get(path) {
                if at.elapsed() < TAG_CACHE_TTL {
                    return Ok(versions.clone());
                }
            }
        }

        let mut versions: Vec<PackageVersion> = self
            .raw_tags(path)?
            .iter()
            .filter_map(|tag| PackageVersion::try_parse(tag))
            .collect();
        versions.sort();
        versions.dedup();
        versions.reverse();

        self.tag_cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), (Instant::now(), versions.clone()));

        Ok(versions)
    }

    fn current_version(&self, path: &Path) -> Result<PackageVersion, UpdateError> {
        let output = run_git(Some(path), &["describe", "--tags", "--exact-match", "HEAD"])
            .map_err(|e| UpdateError::GitFetch(e.to_string()))?;
        if !output.status.success() {
            // Untagged HEAD, including a fresh clone before first checkout.
            return Ok(PackageVersion::Empty);
        }
        Ok(PackageVersion::parse_or_empty(
            String::from_utf8_lossy(&output.stdout).trim(),
        ))
    }

    fn checkout(&self, path: &Path, version: &PackageVersion) -> Result<(), UpdateError> {
        let tag = self
            .tag_for(path, version)?
            .ok_or_else(|| UpdateError::GitTagMissing(version.clone()))?;

        debug!("Checking out tag {} in {}", tag, path.display());
        let output = run_git(Some(path), &["checkout", "--force", &tag])
            .map_err(|e| UpdateError::GitCheckout(e.to_string()))?;
        if !output.status.success() {
            return Err(UpdateError::GitCheckout(stderr_of(&output)));
        }
        Ok(())
    }
}

fn run_git(workdir: Option<&Path>, args: &[&str]) -> std::io::Result<std::process::Output> {
    let mut cmd = Command::new("git");
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.args(args).output()
}

fn stderr_of(output: &std::process::Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    if text.is_empty() {
        format!("git exited with {}", output.status)
    } else {
        text.to_string()
    }
}
