//! Container-to-host path translation.
//!
//! When refit runs inside a container and issues SSH commands to the host,
//! paths under its own filesystem must be rewritten to the host side of the
//! volume binds before they appear in a remote command line.

/// One volume bind, host side first.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub host_path: String,
    pub container_path: String,
}

impl Bind {
    /// Parse the `host:container` form used in configuration.
    pub fn parse(spec: &str) -> Option<Self> {
        let (host, container) = spec.split_once(':')?;
        if host.is_empty() || container.is_empty() {
            return None;
        }
        Some(Self {
            host_path: host.trim_end_matches('/').to_string(),
            container_path: container.trim_end_matches('/').to_string(),
        })
    }
}

/// Rewrite `container_path` through the longest matching bind. Returns the
/// input unchanged when no bind covers it (the not-in-a-container case).
pub fn translate(container_path: &str, binds: &[Bind]) -> String {
    let mut best: Option<&Bind> = None;
    for bind in binds {
        let prefix = &bind.container_path;
        let covered = container_path == *prefix
            || container_path.starts_with(&format!("{}/", prefix));
        if covered && best.map_or(true, |b| prefix.len() > b.container_path.len()) {
            best = Some(bind);
        }
    }

    match best {
        Some(bind) => format!(
            "{}{}",
            bind.host_path,
            &container_path[bind.container_path.len()..]
        ),
        None => container_path.to_string(),
    }
}
