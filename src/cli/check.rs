use anyhow::Result;

use crate::config::{PackageConfig, RefitConfig};
use crate::git::{GitCli, GitProvider};
use crate::output;
use crate::state::DeploymentState;
use crate::version::PackageVersion;

/// Report which packages have newer tags. Applies nothing.
pub async fn run(config: RefitConfig, package: Option<&str>) -> Result<()> {
    super::run::preflight()?;
    let git = GitCli::new();

    output::header("Version check");

    match package {
        Some(name) => check_one(&git, config.package(name)?)?,
        None => {
            for pkg in &config.packages {
                if let Err(e) = check_one(&git, pkg) {
                    output::error(&format!("{}: {:#}", pkg.name, e));
                }
            }
        }
    }

    Ok(())
}

fn check_one(git: &GitCli, pkg: &PackageConfig) -> Result<()> {
    let spinner = output::create_spinner(&format!("Fetching tags for {}...", pkg.name));
    git.ensure_cloned(&pkg.repository_url, &pkg.repository_location)?;
    git.fetch_tags(&pkg.repository_location)?;
    spinner.finish_and_clear();

    let available = git
        .list_versions(&pkg.repository_location)?
        .into_iter()
        .next()
        .unwrap_or(PackageVersion::Empty);
    let current = DeploymentState::load(&pkg.compose_dir())?.version;

    if available > current {
        output::info(&format!("{}: {} -> {} available", pkg.name, current, available));
    } else {
        output::success(&format!("{}: up to date at {}", pkg.name, current));
    }
    Ok(())
}
