//! Shared fakes for exercising the update machinery without a host.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{PackageConfig, TimeoutConfig};
use crate::error::UpdateError;
use crate::git::GitProvider;
use crate::ssh::{Channel, CommandOutput};
use crate::state::DeploymentState;
use crate::version::PackageVersion;

/// Scripted stand-in for the SSH channel. Commands are matched by
/// substring against configured rules, first match wins; unmatched
/// commands succeed with empty output. Every command is logged.
pub struct MockHost {
    rules: Vec<Rule>,
    log: Mutex<Vec<String>>,
    pub arch: String,
}

struct Rule {
    needle: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            log: Mutex::new(Vec::new()),
            arch: "x86_64".to_string(),
        }
    }

    pub fn on(mut self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
        self
    }

    /// Commands seen so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }
}

impl Channel for MockHost {
    async fn execute(
        &self,
        command: &str,
        _working_dir: Option<&str>,
    ) -> Result<CommandOutput, UpdateError> {
        self.log.lock().unwrap().push(command.to_string());
        for rule in &self.rules {
            if command.contains(&rule.needle) {
                return Ok(CommandOutput {
                    exit_code: rule.exit_code,
                    stdout: rule.stdout.clone(),
                    stderr: rule.stderr.clone(),
                    elapsed: Duration::ZERO,
                });
            }
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        })
    }

    async fn read_file(&self, _path: &str) -> Result<String, UpdateError> {
        Ok(String::new())
    }

    async fn write_file(&self, _path: &str, _content: &str) -> Result<(), UpdateError> {
        Ok(())
    }

    async fn architecture(&self) -> Result<String, UpdateError> {
        Ok(self.arch.clone())
    }
}

/// In-memory git provider with a fixed tag list.
pub struct MockGit {
    tags: Vec<PackageVersion>,
    pub checkouts: Mutex<Vec<PackageVersion>>,
    pub fail_checkout: bool,
}

impl MockGit {
    pub fn with_tags(tags: &[PackageVersion]) -> Self {
        Self {
            tags: tags.to_vec(),
            checkouts: Mutex::new(Vec::new()),
            fail_checkout: false,
        }
    }
}

impl GitProvider for MockGit {
    fn ensure_cloned(&self, _url: &str, _path: &Path) -> Result<(), UpdateError> {
        Ok(())
    }

    fn fetch_tags(&self, _path: &Path) -> Result<(), UpdateError> {
        Ok(())
    }

    fn list_versions(&self, _path: &Path) -> Result<Vec<PackageVersion>, UpdateError> {
        let mut versions = self.tags.clone();
        versions.sort();
        versions.reverse();
        Ok(versions)
    }

    fn current_version(&self, _path: &Path) -> Result<PackageVersion, UpdateError> {
        Ok(PackageVersion::Empty)
    }

    fn checkout(&self, _path: &Path, version: &PackageVersion) -> Result<(), UpdateError> {
        if self.fail_checkout {
            return Err(UpdateError::GitCheckout("simulated".to_string()));
        }
        self.checkouts.lock().unwrap().push(version.clone());
        Ok(())
    }
}

/// A package rooted in a temp directory with one compose file.
pub struct PackageFixture {
    dir: tempfile::TempDir,
    pub config: PackageConfig,
}

impl PackageFixture {
    pub fn new(name: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();
        let config = PackageConfig {
            name: name.to_string(),
            repository_url: "https://git.example.com/fixture.git".to_string(),
            repository_location: dir.path().to_path_buf(),
            compose_subdirectory: ".".to_string(),
            docker_registry_url: None,
            docker_auth: None,
            binds: Vec::new(),
            git_author_name: None,
            git_author_email: None,
        };
        Self { dir, config }
    }

    pub fn add_script(&self, file_name: &str) {
        std::fs::write(self.dir.path().join(file_name), "#!/bin/sh\nexit 0\n").unwrap();
    }

    pub fn seed_state(&self, state: &DeploymentState) {
        state.save(self.dir.path()).unwrap();
    }

    pub fn state_on_disk(&self) -> DeploymentState {
        DeploymentState::load(self.dir.path()).unwrap()
    }
}

/// Tight limits so unhealthy scenarios settle after one poll.
pub fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        backup_seconds: 5,
        migration_script_seconds: 5,
        compose_up_seconds: 5,
        health_seconds: 0,
    }
}
