use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::events::{Event, EventBus};
use crate::testutil::{fast_timeouts, MockGit, MockHost, PackageFixture};

const PS_ALL_HEALTHY: &str =
    "{\"Service\":\"api\",\"State\":\"running\",\"Health\":\"healthy\"}\n";
const PS_WORKER_DOWN: &str = concat!(
    "{\"Service\":\"api\",\"State\":\"running\",\"Health\":\"healthy\"}\n",
    "{\"Service\":\"worker\",\"State\":\"exited\",\"Health\":\"\"}\n",
);
const PS_API_UNHEALTHY: &str =
    "{\"Service\":\"api\",\"State\":\"running\",\"Health\":\"unhealthy\"}\n";

fn v(text: &str) -> PackageVersion {
    PackageVersion::try_parse(text).unwrap()
}

fn state_at(version: &str) -> DeploymentState {
    let mut state = DeploymentState {
        version: v(version),
        ..Default::default()
    };
    state.up.insert(v(version));
    state
}

fn orchestrator<'a>(
    host: &'a MockHost,
    git: &'a MockGit,
    fixture: &'a PackageFixture,
) -> Orchestrator<'a, MockHost, MockGit> {
    Orchestrator::new(
        host,
        git,
        &fixture.config,
        EventBus::new(),
        fast_timeouts(),
        Arc::new(AtomicBool::new(false)),
    )
}

#[tokio::test]
async fn test_clean_upgrade_without_backup() {
    let fixture = PackageFixture::new("shop");
    fixture.add_script("up-1.1.0.sh");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 1, "", "")
        .on("docker compose ps", 0, PS_ALL_HEALTHY, "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Success);
    assert_eq!(report.executed_scripts, vec!["up-1.1.0.sh"]);
    assert!(report.backup.is_none());

    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.1.0"));
    assert!(disk.up.contains(&v("1.0.0")));
    assert!(disk.up.contains(&v("1.1.0")));
    assert!(disk.failed.is_empty());

    assert_eq!(*git.checkouts.lock().unwrap(), vec![v("1.1.0")]);
    assert!(host.ran("docker compose -f docker-compose.yml down"));
    assert!(host.ran("docker compose -f docker-compose.yml up -d"));
    assert!(host.ran("./up-1.1.0.sh"));
    assert!(!host.ran("restore.sh"));
}

#[tokio::test]
async fn test_failing_migration_rolls_back_with_backup() {
    let fixture = PackageFixture::new("shop");
    fixture.add_script("up-1.1.0.sh");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 0, "", "")
        .on("./backup.sh", 0, "{\"file\":\"/b/1.tgz\"}", "")
        .on("./up-1.1.0.sh", 1, "", "schema locked")
        .on("./restore.sh", 0, "{\"success\":true}", "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Failed);
    assert!(report.recovery_performed);
    assert_eq!(report.backup.as_deref(), Some("/b/1.tgz"));
    assert!(report.error.as_deref().unwrap().contains("up-1.1.0.sh"));
    // The failed script never made it into the executed list.
    assert!(report.executed_scripts.is_empty());

    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.0.0"));
    assert!(disk.up.contains(&v("1.0.0")));
    assert!(!disk.up.contains(&v("1.1.0")));
    assert!(disk.failed.contains(&v("1.1.0")));

    assert!(host.ran("./restore.sh --file=\"/b/1.tgz\" --format=json"));
    // Rollback restarts the previous version, which was checked out again.
    assert_eq!(*git.checkouts.lock().unwrap(), vec![v("1.0.0")]);
    assert!(host.ran("docker compose -f docker-compose.yml up -d"));
}

#[tokio::test]
async fn test_noop_when_current_equals_target() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.2.0"));

    let host = MockHost::new();
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0"), v("1.2.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.2.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Success);
    assert!(report.executed_scripts.is_empty());
    // Nothing touched the host at all.
    assert!(host.commands().is_empty());
    assert!(git.checkouts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_partial_success_with_noncritical_unhealthy() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 1, "", "")
        .on("docker compose ps", 0, PS_WORKER_DOWN, "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::PartialSuccess);
    assert!(report.error.as_deref().unwrap().contains("worker"));

    let health = report.health.unwrap();
    assert!(!health.all_healthy);
    assert!(!health.critical_failure);
    assert!(!health.services["worker"].healthy);
    assert!(health.services["api"].healthy);

    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.1.0"));
    assert!(disk.partial);
}

#[tokio::test]
async fn test_critical_unhealthy_with_backup_rolls_back() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 0, "", "")
        .on("./backup.sh", 0, "{\"file\":\"/b/2.tgz\"}", "")
        .on("docker compose ps", 0, PS_API_UNHEALTHY, "")
        .on("./restore.sh", 0, "{\"success\":true}", "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Failed);
    assert!(report.recovery_performed);
    assert!(report.error.as_deref().unwrap().contains("api"));

    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.0.0"));
    assert!(!disk.partial);

    // Checkout of the new version, then back to the old one.
    assert_eq!(
        *git.checkouts.lock().unwrap(),
        vec![v("1.1.0"), v("1.0.0")]
    );
}

#[tokio::test]
async fn test_restore_failure_is_recoverable_failure() {
    let fixture = PackageFixture::new("shop");
    fixture.add_script("up-1.1.0.sh");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 0, "", "")
        .on("./backup.sh", 0, "{\"file\":\"/b/3.tgz\"}", "")
        .on("./up-1.1.0.sh", 1, "", "boom")
        .on("./restore.sh", 1, "", "archive corrupt");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::RecoverableFailure);
    assert!(!report.recovery_performed);
    assert_eq!(report.backup.as_deref(), Some("/b/3.tgz"));
    assert!(report.error.as_deref().unwrap().contains("/b/3.tgz"));

    // Rollback never completed, so the durable state is untouched.
    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.0.0"));
    assert!(disk.failed.is_empty());
    // The old version was not restarted either.
    assert!(git.checkouts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_backup_failure_stops_before_any_mutation() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 0, "", "")
        .on("./backup.sh", 1, "", "disk full");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Failed);
    assert!(!report.recovery_performed);
    assert!(!host.ran("docker compose"));
    assert_eq!(fixture.state_on_disk().version, v("1.0.0"));
}

#[tokio::test]
async fn test_failure_without_backup_skips_rollback() {
    let fixture = PackageFixture::new("shop");
    fixture.add_script("up-1.1.0.sh");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 1, "", "")
        .on("./up-1.1.0.sh", 1, "", "boom");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.1.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Failed);
    assert!(!report.recovery_performed);
    assert!(!host.ran("restore.sh"));
    // No checkout back to the old version either.
    assert!(git.checkouts.lock().unwrap().is_empty());
    // The durable state still shows the old version.
    assert_eq!(fixture.state_on_disk().version, v("1.0.0"));
}

#[tokio::test]
async fn test_downgrade_runs_down_scripts_descending() {
    let fixture = PackageFixture::new("shop");
    fixture.add_script("down-1.2.0.sh");
    fixture.add_script("down-1.1.0.sh");
    let mut state = state_at("1.2.0");
    state.up.insert(v("1.0.0"));
    state.up.insert(v("1.1.0"));
    fixture.seed_state(&state);

    let host = MockHost::new()
        .on("test -x", 1, "", "")
        .on("docker compose ps", 0, PS_ALL_HEALTHY, "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0"), v("1.2.0")]);

    let report = orchestrator(&host, &git, &fixture)
        .update(&v("1.0.0"))
        .await
        .unwrap();

    assert_eq!(report.status, UpdateStatus::Success);
    assert_eq!(
        report.executed_scripts,
        vec!["down-1.2.0.sh", "down-1.1.0.sh"]
    );

    let disk = fixture.state_on_disk();
    assert_eq!(disk.version, v("1.0.0"));
    assert!(disk.up.contains(&v("1.0.0")));
    assert!(!disk.up.contains(&v("1.1.0")));
    assert!(!disk.up.contains(&v("1.2.0")));
}

#[tokio::test]
async fn test_cancellation_stops_before_first_phase() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new().on("test -x", 1, "", "");
    let git = MockGit::with_tags(&[v("1.1.0")]);
    let cancel = Arc::new(AtomicBool::new(false));
    cancel.store(true, Ordering::Relaxed);

    let orch = Orchestrator::new(
        &host,
        &git,
        &fixture.config,
        EventBus::new(),
        fast_timeouts(),
        cancel,
    );
    let err = orch.update(&v("1.1.0")).await.unwrap_err();

    assert!(matches!(err, UpdateError::Cancelled));
    // Not even the backup probe ran.
    assert!(host.commands().is_empty());
    assert_eq!(fixture.state_on_disk().version, v("1.0.0"));
}

#[tokio::test]
async fn test_events_arrive_in_causal_order() {
    let fixture = PackageFixture::new("shop");
    fixture.seed_state(&state_at("1.0.0"));

    let host = MockHost::new()
        .on("test -x", 1, "", "")
        .on("docker compose ps", 0, PS_ALL_HEALTHY, "");
    let git = MockGit::with_tags(&[v("1.0.0"), v("1.1.0")]);

    let events = EventBus::new();
    let mut rx = events.subscribe();

    let orch = Orchestrator::new(
        &host,
        &git,
        &fixture.config,
        events.clone(),
        fast_timeouts(),
        Arc::new(AtomicBool::new(false)),
    );
    orch.update(&v("1.1.0")).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(Event::UpdateStarted { .. })));
    let completed_at = seen
        .iter()
        .position(|e| matches!(e, Event::UpdateCompleted { success: true, .. }))
        .expect("UpdateCompleted emitted");
    let last_progress = seen
        .iter()
        .rposition(|e| matches!(e, Event::UpdateProgress { .. }))
        .unwrap();
    assert!(last_progress < completed_at);
}
