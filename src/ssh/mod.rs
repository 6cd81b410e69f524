pub mod exec;

use std::time::Duration;

use openssh::{KnownHosts, Session, SessionBuilder};
use tracing::debug;

use crate::config::{SshAuthMethod, SshConfig};
use crate::error::UpdateError;

/// Result of one remote command. A non-zero exit code is data for the
/// caller, not an error.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The narrow command channel everything host-facing goes through. The
/// production implementation is [`SshChannel`]; tests drive the update
/// machinery with a scripted fake.
#[allow(async_fn_in_trait)]
pub trait Channel {
    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<CommandOutput, UpdateError>;

    async fn read_file(&self, path: &str) -> Result<String, UpdateError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), UpdateError>;

    async fn architecture(&self) -> Result<String, UpdateError>;

    async fn make_executable(&self, path: &str) -> Result<(), UpdateError> {
        let output = self.execute(&format!("chmod +x {}", path), None).await?;
        if !output.success() {
            return Err(UpdateError::SshExec(format!(
                "chmod +x {} failed: {}",
                path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, UpdateError> {
        Ok(self
            .execute(&format!("test -e {}", path), None)
            .await?
            .success())
    }

    async fn is_executable(&self, path: &str) -> Result<bool, UpdateError> {
        Ok(self
            .execute(&format!("test -x {}", path), None)
            .await?
            .success())
    }
}

/// SSH-backed [`Channel`]. Sessions are short-lived: every operation opens
/// its own session and closes it, so no long-lived remote state is assumed.
pub struct SshChannel {
    config: SshConfig,
}

impl SshChannel {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    async fn connect(&self) -> Result<Session, UpdateError> {
        let cfg = &self.config;
        debug!("Connecting to {}@{}:{}", cfg.user, cfg.host, cfg.port);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(cfg.user.clone());
        builder.port(cfg.port);
        builder.connect_timeout(Duration::from_secs(cfg.timeout_seconds));
        builder.server_alive_interval(Duration::from_secs(cfg.keep_alive_seconds));
        builder.compression(cfg.enable_compression);

        // Password-bearing methods fall through to the system ssh
        // configuration (agent/askpass); key methods pin the identity file.
        match cfg.auth_method {
            SshAuthMethod::PrivateKey
            | SshAuthMethod::PrivateKeyWithPassphrase
            | SshAuthMethod::KeyWithPasswordFallback => {
                if let Some(key) = &cfg.key_path {
                    builder.keyfile(key);
                }
            }
            SshAuthMethod::Password => {}
        }

        builder.connect(&cfg.host).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("Permission denied") || text.contains("Authentication") {
                UpdateError::SshAuth(text)
            } else {
                UpdateError::SshConnect(text)
            }
        })
    }
}
