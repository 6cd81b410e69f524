use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::version::PackageName;

mod validate;

#[derive(Debug, Deserialize, Serialize)]
pub struct RefitConfig {
    pub ssh: SshConfig,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SshConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub password: Option<String>,
    pub key_path: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    #[serde(default)]
    pub auth_method: SshAuthMethod,
    #[serde(default = "default_ssh_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_ssh_keep_alive")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SshAuthMethod {
    Password,
    #[default]
    PrivateKey,
    PrivateKeyWithPassphrase,
    KeyWithPasswordFallback,
}

fn default_ssh_port() -> u16 {
    22
}
fn default_ssh_timeout() -> u64 {
    30
}
fn default_ssh_keep_alive() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    60
}

/// Per-phase time limits, in seconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_backup_timeout")]
    pub backup_seconds: u64,
    #[serde(default = "default_script_timeout")]
    pub migration_script_seconds: u64,
    #[serde(default = "default_compose_up_timeout")]
    pub compose_up_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub health_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            backup_seconds: default_backup_timeout(),
            migration_script_seconds: default_script_timeout(),
            compose_up_seconds: default_compose_up_timeout(),
            health_seconds: default_health_timeout(),
        }
    }
}

fn default_backup_timeout() -> u64 {
    600
}
fn default_script_timeout() -> u64 {
    300
}
fn default_compose_up_timeout() -> u64 {
    300
}
fn default_health_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageConfig {
    pub name: String,
    pub repository_url: String,
    /// Local path of the git working tree.
    pub repository_location: PathBuf,
    /// Relative path inside the tree holding compose files and scripts.
    #[serde(default = "default_compose_subdirectory")]
    pub compose_subdirectory: String,
    pub docker_registry_url: Option<String>,
    pub docker_auth: Option<DockerAuth>,
    /// `host:container` volume binds used to translate local paths to host
    /// paths when refit itself runs in a container.
    #[serde(default)]
    pub binds: Vec<String>,
    pub git_author_name: Option<String>,
    pub git_author_email: Option<String>,
}

fn default_compose_subdirectory() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DockerAuth {
    pub username: String,
    pub password: String,
}

impl PackageConfig {
    pub fn package_name(&self) -> PackageName {
        PackageName::new(&self.name)
    }

    /// Local directory holding compose files, migration scripts, and
    /// `deployment.state.json`.
    pub fn compose_dir(&self) -> PathBuf {
        if self.compose_subdirectory == "." {
            self.repository_location.clone()
        } else {
            self.repository_location.join(&self.compose_subdirectory)
        }
    }

    /// The compose directory as the target host sees it, with volume binds
    /// applied.
    pub fn host_compose_dir(&self) -> String {
        let binds: Vec<crate::paths::Bind> = self
            .binds
            .iter()
            .filter_map(|spec| crate::paths::Bind::parse(spec))
            .collect();
        crate::paths::translate(&self.compose_dir().to_string_lossy(), &binds)
    }
}

impl RefitConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        validate::validate(&config)?;

        Ok(config)
    }

    pub fn package(&self, name: &str) -> Result<&PackageConfig> {
        let wanted = PackageName::new(name);
        self.packages
            .iter()
            .find(|p| p.package_name() == wanted)
            .with_context(|| format!("Package '{}' not found in config", name))
    }
}
