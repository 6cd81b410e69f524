use tokio::sync::broadcast;

use crate::version::{PackageName, PackageVersion};

/// Progress events the update core publishes for interested listeners
/// (CLI, future UI). The core never consumes its own events.
#[derive(Debug, Clone)]
pub enum Event {
    VersionCheckCompleted {
        package: PackageName,
        current: PackageVersion,
        available: PackageVersion,
    },
    UpdateStarted {
        package: PackageName,
        from: PackageVersion,
        to: PackageVersion,
    },
    UpdateProgress {
        package: PackageName,
        operation: String,
        percent: u8,
    },
    UpdateCompleted {
        package: PackageName,
        success: bool,
        error: Option<String>,
    },
    PackageStatusChanged {
        package: PackageName,
        version: PackageVersion,
    },
}

/// In-process fan-out bus. Publishing never blocks: slow subscribers lag
/// and lose old events rather than stalling the scheduler. Dropping the
/// receiver unsubscribes.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // Err means no subscribers, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
