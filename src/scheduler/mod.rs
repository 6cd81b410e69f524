use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{PackageConfig, TimeoutConfig};
use crate::error::UpdateError;
use crate::events::{Event, EventBus};
use crate::git::GitProvider;
use crate::registry::PackageRegistry;
use crate::ssh::Channel;
use crate::state::DeploymentState;
use crate::update::{CancelFlag, Orchestrator, UpdateReport};
use crate::version::{PackageName, PackageVersion};

/// Periodically scans every configured package and drives an update when
/// the newest tag is ahead of the deployed version. Packages are processed
/// sequentially; a failure in one never aborts the loop.
pub struct Scheduler<C: Channel, G: GitProvider> {
    channel: Arc<C>,
    git: Arc<G>,
    registry: PackageRegistry,
    events: EventBus,
    timeouts: TimeoutConfig,
    interval: Duration,
    cancel: CancelFlag,
    locks: Mutex<HashMap<PackageName, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Channel, G: GitProvider> Scheduler<C, G> {
    pub fn new(
        channel: Arc<C>,
        git: Arc<G>,
        registry: PackageRegistry,
        events: EventBus,
        timeouts: TimeoutConfig,
        interval: Duration,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            channel,
            git,
            registry,
            events,
            timeouts,
            interval,
            cancel,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run scan cycles until cancelled.
    pub async fn run(&self) {
        info!(
            "Watching {} package(s) every {}s",
            self.registry.len(),
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.cancel.load(Ordering::Relaxed) {
                info!("Scheduler stopping");
                return;
            }
            self.scan_once().await;
        }
    }

    /// One pass over the registry.
    pub async fn scan_once(&self) {
        for package in self.registry.iter() {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            if let Err(e) = self.check_package(package).await {
                warn!("Package {}: {}", package.name, e);
            }
        }
    }

    /// Fetch tags for one package and update it when behind.
    pub async fn check_package(
        &self,
        package: &PackageConfig,
    ) -> Result<Option<UpdateReport>, UpdateError> {
        self.git
            .ensure_cloned(&package.repository_url, &package.repository_location)?;
        self.git.fetch_tags(&package.repository_location)?;

        let available = self
            .git
            .list_versions(&package.repository_location)?
            .into_iter()
            .next()
            .unwrap_or(PackageVersion::Empty);

        let current = DeploymentState::load(&package.compose_dir())?.version;

        self.events.publish(Event::VersionCheckCompleted {
            package: package.package_name(),
            current: current.clone(),
            available: available.clone(),
        });

        if available <= current || available.is_empty() {
            debug!("{} is up to date at {}", package.name, current);
            return Ok(None);
        }

        info!("{}: {} -> {}", package.name, current, available);

        // At most one in-flight update per package; a concurrent caller
        // parks here until the running one finishes.
        let lock = self.lock_for(&package.package_name());
        let _guard = lock.lock().await;

        let orchestrator = Orchestrator::new(
            self.channel.as_ref(),
            self.git.as_ref(),
            package,
            self.events.clone(),
            self.timeouts,
            self.cancel.clone(),
        );
        orchestrator.update(&available).await.map(Some)
    }

    fn lock_for(&self, name: &PackageName) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(name.clone()).or_default().clone()
    }
}
