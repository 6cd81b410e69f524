use anyhow::{bail, Context, Result};
use dialoguer::Input;
use std::path::Path;

use crate::output;

const TEMPLATE: &str = r#"# refit configuration

[ssh]
host = "{host}"
user = "{user}"
# auth_method: password | private-key | private-key-with-passphrase | key-with-password-fallback
auth_method = "private-key"
key_path = "~/.ssh/id_ed25519"

# How often to look for new tags, in seconds.
poll_interval_seconds = 60

[[packages]]
name = "{package}"
repository_url = "{repository}"
repository_location = "/var/refit/{package}"
compose_subdirectory = "deploy"
"#;

pub fn run() -> Result<()> {
    let config_path = Path::new("refit.toml");
    if config_path.exists() {
        bail!("refit.toml already exists in this directory");
    }

    let default_name = std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "myapp".to_string());

    let default_repo = detect_git_remote().unwrap_or_default();

    let host: String = Input::new()
        .with_prompt("Target host")
        .interact_text()?;

    let user: String = Input::new()
        .with_prompt("SSH user")
        .default("deploy".to_string())
        .interact_text()?;

    let package: String = Input::new()
        .with_prompt("Package name")
        .default(default_name)
        .interact_text()?;

    let repository: String = Input::new()
        .with_prompt("Git repository URL")
        .default(default_repo)
        .interact_text()?;

    let content = TEMPLATE
        .replace("{host}", &host)
        .replace("{user}", &user)
        .replace("{package}", &package)
        .replace("{repository}", &repository);

    std::fs::write(config_path, content).context("Failed to write refit.toml")?;

    output::success("Created refit.toml");
    output::info("Edit the file to add packages or tune timeouts.");

    Ok(())
}

fn detect_git_remote() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["remote", "get-url", "origin"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
