use super::*;
use crate::fake::{FakeCloud, FakeConnector, Harness, account, auth_failure};
use iprotate_cloud::CloudError;
use iprotate_router::RouterDocument;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_only_active_accounts_are_probed() {
    let connector = FakeConnector::default()
        .with("K1", FakeCloud::new("a1"))
        .with("K2", FakeCloud::new("a2"))
        .with("K3", FakeCloud::new("a3"))
        .with("K4", FakeCloud::new("a4"));
    let harness = Harness::new(
        connector,
        vec![
            account("a1", "K1", AccountStatus::Active),
            account("a2", "K2", AccountStatus::Available),
            account("a3", "K3", AccountStatus::Suspended),
            account("a4", "K4", AccountStatus::Error),
        ],
    );

    let report = HealthMonitor::new(harness.ctx.clone()).run_cycle().await;
    assert_eq!(report.probed, 1);
    assert_eq!(report.healthy, 1);
    assert!(report.suspended.is_empty());
    assert_eq!(harness.cloud("K1").probe_count(), 1);
    for key in ["K2", "K3", "K4"] {
        assert_eq!(harness.cloud(key).probe_count(), 0, "{key} was probed");
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejected_account_is_suspended_even_without_backup() {
    let connector = FakeConnector::default()
        .with("K1", FakeCloud::rejecting("a1"))
        .with("K2", FakeCloud::new("a2"));
    let harness = Harness::new(
        connector,
        vec![
            account("a1", "K1", AccountStatus::Active),
            account("a2", "K2", AccountStatus::Suspended),
        ],
    );
    let before = harness.stored();

    let report = HealthMonitor::new(harness.ctx.clone()).run_cycle().await;
    assert_eq!(report.suspended, vec!["a1"]);
    assert_eq!(report.unresolved, vec!["a1"]);
    assert!(report.replaced.is_empty());

    let after = harness.stored();
    assert_eq!(after[0].status, AccountStatus::Suspended);
    assert_eq!(after[0].used_for_instances, before[0].used_for_instances);
    assert_eq!(after[1], before[1]);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_probe_error_also_suspends() {
    let connector = FakeConnector::default().with(
        "K1",
        FakeCloud::new("a1").with_probe_error(CloudError::Process("connection reset".into())),
    );
    let harness = Harness::new(
        connector,
        vec![account("a1", "K1", AccountStatus::Active)],
    );

    let report = HealthMonitor::new(harness.ctx.clone()).run_cycle().await;
    assert_eq!(report.suspended, vec!["a1"]);
    assert_eq!(harness.stored_account("a1").status, AccountStatus::Suspended);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_account_fails_over_to_first_available_backup() {
    let connector = FakeConnector::default()
        .with("K1", FakeCloud::new("a1").with_probe_error(auth_failure()))
        .with("KB1", FakeCloud::new("b1"))
        .with("KB2", FakeCloud::new("b2"));
    let mut old = account("a1", "K1", AccountStatus::Active);
    old.used_for_instances = vec!["i-old".to_string()];
    let harness = Harness::new(
        connector,
        vec![
            old,
            account("b1", "KB1", AccountStatus::Available),
            account("b2", "KB2", AccountStatus::Available),
        ],
    );
    harness.write_router(
        "[2000]\ntype = aws\nsocks5Port = 2000\nhttpPort = 3000\naccessKey = K1\nsecretKey = secret-a1\ninstanceId = i-old\nregion = us-east-1\n",
    );

    let report = HealthMonitor::new(harness.ctx.clone()).run_cycle().await;
    assert_eq!(report.probed, 1);
    assert_eq!(report.replaced, vec!["a1"]);
    assert!(report.unresolved.is_empty());

    let a1 = harness.stored_account("a1");
    assert_eq!(a1.status, AccountStatus::Suspended);
    assert!(a1.used_for_instances.is_empty());
    let b1 = harness.stored_account("b1");
    assert_eq!(b1.status, AccountStatus::Active);
    assert_eq!(b1.used_for_instances, vec!["i-b1-001"]);
    assert_eq!(harness.stored_account("b2").status, AccountStatus::Available);

    let doc = RouterDocument::parse(&harness.router_text());
    assert_eq!(doc.get("2000", "accessKey"), Some("KB1"));
    assert_eq!(doc.get("2000", "instanceId"), Some("i-b1-001"));
}

#[tokio::test(start_paused = true)]
async fn test_cycle_picks_up_external_edits() {
    let connector = FakeConnector::default()
        .with("K1", FakeCloud::new("a1"))
        .with("K2", FakeCloud::new("a2"));
    let harness = Harness::new(
        connector,
        vec![account("a1", "K1", AccountStatus::Active)],
    );
    iprotate_registry::AccountStore::new(&harness.ctx.config.paths.accounts_file)
        .save(&[
            account("a1", "K1", AccountStatus::Active),
            account("a2", "K2", AccountStatus::Active),
        ])
        .unwrap();

    let report = HealthMonitor::new(harness.ctx.clone()).run_cycle().await;
    assert_eq!(report.probed, 2);
    assert_eq!(harness.cloud("K2").probe_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_repeats_until_cancelled() {
    let connector = FakeConnector::default().with("K1", FakeCloud::new("a1"));
    let harness = Harness::new(
        connector,
        vec![account("a1", "K1", AccountStatus::Active)],
    );
    let monitor = HealthMonitor::new(harness.ctx.clone());
    let handle = tokio::spawn(async move { monitor.run().await });

    tokio::time::sleep(Duration::from_secs(1500)).await;
    harness.ctx.cancel.cancel();
    handle.await.unwrap();

    assert_eq!(harness.cloud("K1").probe_count(), 3);
}
