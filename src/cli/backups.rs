use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::backup;
use crate::config::RefitConfig;
use crate::output;
use crate::ssh::SshChannel;

/// List the backup archives sitting next to a package's compose files.
pub async fn run(config: RefitConfig, package: &str) -> Result<()> {
    let pkg = config.package(package)?;
    let channel = SshChannel::new(config.ssh.clone());

    let archives = backup::list(&channel, &pkg.host_compose_dir()).await?;
    if archives.is_empty() {
        output::info(&format!("No backups found for {}", pkg.name));
        return Ok(());
    }

    output::header(&format!("Backups for {}", pkg.name));
    for (name, timestamp) in archives {
        if timestamp == DateTime::<Utc>::UNIX_EPOCH {
            output::kv(&name, "(unrecognized timestamp)");
        } else {
            output::kv(&name, &timestamp.to_rfc3339());
        }
    }

    Ok(())
}
