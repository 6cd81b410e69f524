use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::version::PackageName;

use super::{RefitConfig, SshAuthMethod};

pub fn validate(config: &RefitConfig) -> Result<()> {
    if config.ssh.host.is_empty() {
        bail!("ssh.host cannot be empty");
    }

    if config.ssh.user.is_empty() {
        bail!("ssh.user cannot be empty");
    }

    match config.ssh.auth_method {
        SshAuthMethod::PrivateKey | SshAuthMethod::PrivateKeyWithPassphrase => {
            if config.ssh.key_path.is_none() {
                bail!(
                    "ssh.auth_method '{:?}' requires ssh.key_path",
                    config.ssh.auth_method
                );
            }
        }
        SshAuthMethod::KeyWithPasswordFallback => {
            if config.ssh.key_path.is_none() && config.ssh.password.is_none() {
                bail!("ssh.auth_method 'key-with-password-fallback' requires ssh.key_path or ssh.password");
            }
        }
        SshAuthMethod::Password => {}
    }

    if config.ssh.auth_method == SshAuthMethod::PrivateKeyWithPassphrase
        && config.ssh.key_passphrase.is_none()
    {
        bail!("ssh.auth_method 'private-key-with-passphrase' requires ssh.key_passphrase");
    }

    if config.poll_interval_seconds == 0 {
        bail!("poll_interval_seconds must be at least 1");
    }

    let mut seen: HashSet<PackageName> = HashSet::new();

    for package in &config.packages {
        if package.name.is_empty() {
            bail!("A package has an empty name");
        }

        if package.repository_url.is_empty() {
            bail!("Package '{}' has no repository_url", package.name);
        }

        if package.repository_location.as_os_str().is_empty() {
            bail!("Package '{}' has no repository_location", package.name);
        }

        if !seen.insert(package.package_name()) {
            bail!("Duplicate package name '{}'", package.name);
        }

        for bind in &package.binds {
            if bind.split(':').count() != 2 {
                bail!(
                    "Package '{}' has invalid bind '{}'. Expected host-path:container-path",
                    package.name,
                    bind
                );
            }
        }
    }

    Ok(())
}
