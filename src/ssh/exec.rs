use std::time::Instant;

use tracing::debug;

use crate::error::UpdateError;

use super::{Channel, CommandOutput, SshChannel};

impl Channel for SshChannel {
    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<CommandOutput, UpdateError> {
        let full = match working_dir {
            Some(dir) => format!("cd {} && {}", dir, command),
            None => command.to_string(),
        };
        debug!("[{}] exec: {}", self.host(), full);

        let session = self.connect().await?;
        let started = Instant::now();

        let output = session
            .command("bash")
            .arg("-c")
            .arg(&full)
            .output()
            .await
            .map_err(|e| UpdateError::SshExec(format!("{}: {}", full, e)))?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            elapsed: started.elapsed(),
        };
        debug!(
            "[{}] exit {} after {:?}",
            self.host(),
            result.exit_code,
            result.elapsed
        );

        if let Err(e) = session.close().await {
            debug!("[{}] session close: {}", self.host(), e);
        }

        Ok(result)
    }

    async fn read_file(&self, path: &str) -> Result<String, UpdateError> {
        let output = self.execute(&format!("cat {}", path), None).await?;
        if !output.success() {
            return Err(UpdateError::SshExec(format!(
                "cat {} failed: {}",
                path,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), UpdateError> {
        let escaped = content.replace('\'', "'\\''");
        let output = self
            .execute(
                &format!("cat > {} << 'REFIT_EOF'\n{}\nREFIT_EOF", path, escaped),
                None,
            )
            .await?;
        if !output.success() {
            return Err(UpdateError::SshExec(format!(
                "write {} failed: {}",
                path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn architecture(&self) -> Result<String, UpdateError> {
        let output = self.execute("uname -m", None).await?;
        if !output.success() {
            return Err(UpdateError::SshExec(format!(
                "uname -m failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(normalize_architecture(output.stdout.trim()))
    }
}

/// Map `uname -m` spellings onto the names used in compose file suffixes.
pub fn normalize_architecture(raw: &str) -> String {
    match raw {
        "x86_64" | "amd64" => "x86_64".to_string(),
        "aarch64" | "arm64" => "aarch64".to_string(),
        "armv7l" | "armhf" => "armv7l".to_string(),
        other => other.to_string(),
    }
}
