use anyhow::Result;

use crate::compose;
use crate::config::RefitConfig;
use crate::git::{GitCli, GitProvider};
use crate::output;
use crate::ssh::{Channel, SshChannel};
use crate::state::DeploymentState;
use crate::version::PackageVersion;

/// Per-package view of deployed version, migration state, and what the
/// container runtime reports right now.
pub async fn run(config: RefitConfig) -> Result<()> {
    let channel = SshChannel::new(config.ssh.clone());
    let git = GitCli::new();
    let arch = channel.architecture().await?;

    for pkg in &config.packages {
        output::header(&pkg.name);

        let state = DeploymentState::load(&pkg.compose_dir())?;
        output::kv("deployed", &state.version.to_string());
        if state.partial {
            output::kv("partial", "yes — some services were unhealthy");
        }

        // Best effort: a stale listing is still a listing.
        let _ = git.fetch_tags(&pkg.repository_location);
        let latest = git
            .list_versions(&pkg.repository_location)
            .ok()
            .and_then(|versions| versions.into_iter().next())
            .unwrap_or(PackageVersion::Empty);
        output::kv("latest tag", &latest.to_string());

        output::kv("updated", &state.updated.to_rfc3339());
        output::kv("migrations", &format!("{} applied", state.up.len()));
        if !state.failed.is_empty() {
            let failed: Vec<String> = state.failed.iter().map(|v| v.to_string()).collect();
            output::kv("failed scripts", &failed.join(", "));
        }

        match git.current_version(&pkg.repository_location) {
            Ok(tag) => output::kv("tree at", &tag.to_string()),
            Err(e) => output::kv("tree at", &format!("unknown ({})", e)),
        }

        let files = compose::compose_files_for(&pkg.compose_dir(), &arch);
        match compose::status(&channel, &pkg.host_compose_dir(), &files).await {
            Ok(project) => output::kv(
                "services",
                &format!(
                    "{} ({}/{} running)",
                    project.status, project.running_services, project.total_services
                ),
            ),
            Err(e) => output::kv("services", &format!("unknown ({})", e)),
        }
    }

    Ok(())
}
