use super::*;
use crate::fake::FakeCloud;
use iprotate_cloud::CloudError;
use tokio::time::Instant;

fn config() -> FleetConfig {
    let mut config = FleetConfig::default();
    config.polling.jitter = 0.0;
    config
}

fn vcpu_limit() -> CloudError {
    CloudError::api("VcpuLimitExceeded", "You have requested more vCPU capacity")
}

#[tokio::test]
async fn test_count_is_quota_over_vcpus() {
    let cloud = FakeCloud::new("a").with_quota(&[33.0]).with_vcpus(2);
    let reading = compute_instance_count(&cloud, &config(), "a").await;
    assert_eq!(
        reading,
        QuotaReading {
            count: 16,
            raw_quota: Some(33),
            vcpus: 2
        }
    );
}

#[tokio::test]
async fn test_zero_quota_reads_zero() {
    let cloud = FakeCloud::new("a").with_quota(&[0.0]);
    let reading = compute_instance_count(&cloud, &config(), "a").await;
    assert_eq!(reading.count, 0);
    assert_eq!(reading.raw_quota, Some(0));
}

#[tokio::test]
async fn test_zero_vcpus_yields_zero_count() {
    let cloud = FakeCloud::new("a").with_quota(&[8.0]).with_vcpus(0);
    let reading = compute_instance_count(&cloud, &config(), "a").await;
    assert_eq!(reading.count, 0);
    assert_eq!(reading.raw_quota, Some(8));
}

#[tokio::test]
async fn test_rejected_credentials_read_as_zero_quota() {
    let cloud = FakeCloud::rejecting("a");
    let reading = compute_instance_count(&cloud, &config(), "a").await;
    assert_eq!(reading.count, 0);
    assert_eq!(reading.raw_quota, Some(0));
}

#[tokio::test]
async fn test_other_lookup_errors_are_unknown() {
    let cloud = FakeCloud::new("a").with_quota_error(CloudError::Process("timed out".into()));
    let reading = compute_instance_count(&cloud, &config(), "a").await;
    assert_eq!(reading.count, 0);
    assert_eq!(reading.raw_quota, None);
}

#[test]
fn test_low_quota_window() {
    let reading = |raw| QuotaReading {
        count: 0,
        raw_quota: raw,
        vcpus: 1,
    };
    assert!(reading(Some(5)).is_low(5));
    assert!(reading(Some(1)).is_low(5));
    assert!(!reading(Some(0)).is_low(5));
    assert!(!reading(Some(6)).is_low(5));
    assert!(!reading(None).is_low(5));
}

#[tokio::test(start_paused = true)]
async fn test_quota_raised_midway_returns_early() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[5.0, 5.0, 5.0, 16.0])
        .with_launch_error(vcpu_limit());
    let initial = compute_instance_count(&cloud, &config, "a").await;
    assert!(initial.is_low(5));

    let start = Instant::now();
    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 16);
    assert_eq!(start.elapsed(), Duration::from_secs(120));

    let launches = cloud.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].instance_type, "c5.4xlarge");
    assert_eq!(launches[0].image_id, "ami-new");
}

#[tokio::test(start_paused = true)]
async fn test_quota_unchanged_until_deadline_uses_current_quota() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[5.0])
        .with_launch_error(vcpu_limit());
    let initial = compute_instance_count(&cloud, &config, "a").await;

    let start = Instant::now();
    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 5);
    assert_eq!(start.elapsed(), Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_suspension_during_wait_returns_zero() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[5.0, 5.0, 0.0])
        .with_launch_error(CloudError::api("PendingVerification", "verifying"));
    let initial = compute_instance_count(&cloud, &config, "a").await;
    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_trigger_error_falls_back_to_low_quota() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[5.0])
        .with_launch_error(CloudError::api("InvalidParameterValue", "bad shape"));
    let initial = compute_instance_count(&cloud, &config, "a").await;

    let start = Instant::now();
    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 5);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_accidental_launch_is_terminated() {
    let config = config();
    let cloud = FakeCloud::new("a").with_quota(&[5.0]);
    let initial = compute_instance_count(&cloud, &config, "a").await;

    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 5);
    assert_eq!(cloud.terminate_calls(), vec![vec![cloud.instance_id(1)]]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_the_wait() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[5.0])
        .with_launch_error(vcpu_limit());
    let initial = compute_instance_count(&cloud, &config, "a").await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.cancel();
    });

    let err = attempt_quota_increase(&cloud, &config, "a", initial, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Cancelled(_)));
}

#[tokio::test(start_paused = true)]
async fn test_fallback_never_exceeds_measured_quota() {
    let config = config();
    let cloud = FakeCloud::new("a")
        .with_quota(&[2.0])
        .with_launch_error(CloudError::api("InvalidParameterValue", "bad shape"));
    let initial = compute_instance_count(&cloud, &config, "a").await;
    assert!(initial.is_low(5));

    let count = attempt_quota_increase(&cloud, &config, "a", initial, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(count, 2);
}
