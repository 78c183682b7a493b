use super::*;
use crate::fake::{FakeCloud, account};
use iprotate_core::AccountStatus;

fn pipeline_for(cloud: &Arc<FakeCloud>) -> ProvisioningPipeline {
    let mut config = FleetConfig::default();
    config.polling.jitter = 0.0;
    ProvisioningPipeline::new(
        cloud.clone(),
        account("acc", "AKIA1", AccountStatus::Available),
        Arc::new(config),
        CancellationToken::new(),
    )
}

fn names() -> ResourceNames {
    ResourceNames::bootstrap("t001")
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_without_instances_skips_terminate() {
    let cloud = Arc::new(FakeCloud::new("a"));
    let removed = pipeline_for(&cloud).cleanup().await.unwrap();
    assert_eq!(removed, 0);
    assert!(cloud.terminate_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_terminates_leftovers() {
    let cloud = Arc::new(FakeCloud::new("a").with_running(&["i-old1", "i-old2"]));
    let removed = pipeline_for(&cloud).cleanup().await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        cloud.terminate_calls(),
        vec![vec!["i-old1".to_string(), "i-old2".to_string()]]
    );
    assert_eq!(cloud.state_of("i-old1"), Some(InstanceState::Terminated));
}

#[tokio::test]
async fn test_resolve_image_picks_newest() {
    let cloud = Arc::new(FakeCloud::new("a"));
    assert_eq!(pipeline_for(&cloud).resolve_image().await.unwrap(), "ami-new");
}

#[tokio::test]
async fn test_resolve_image_without_match_fails() {
    let cloud = Arc::new(FakeCloud::new("a").with_images(Vec::new()));
    let err = pipeline_for(&cloud).resolve_image().await.unwrap_err();
    assert!(matches!(
        err,
        FleetError::ProvisioningFailure {
            step: PipelineStep::ImageResolution,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_batch_deploy_installs_by_tag() {
    let cloud = Arc::new(FakeCloud::new("a"));
    let records = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 3, LaunchMode::Batch)
        .await
        .unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.instance_id.as_str()).collect();
    assert_eq!(ids, ["i-a-001", "i-a-002", "i-a-003"]);
    assert!(records.iter().all(|r| r.access_key == "AKIA1" && r.account_id == "acc"));

    let launches = cloud.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].count, 3);
    assert_eq!(launches[0].instance_type, "t2.micro");
    assert_eq!(launches[0].instance_profile.as_deref(), Some("ssm-profile-t001"));
    assert_eq!(launches[0].security_group_id.as_deref(), Some("sg-a"));
    let (tag_key, tag_value) = &launches[0].tags[0];
    assert!(tag_key.starts_with("project-"));

    match &cloud.commands()[..] {
        [CommandTarget::Tag { key, value }] => {
            assert_eq!(key, tag_key);
            assert_eq!(value, tag_value);
        }
        other => panic!("unexpected command targets: {other:?}"),
    }
    assert!(cloud.terminate_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_deploy_installs_by_instance_id() {
    let cloud = Arc::new(FakeCloud::new("a"));
    let records = pipeline_for(&cloud)
        .deploy("ami-new", &ResourceNames::replacement("t002"), 1, LaunchMode::Single)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        cloud.commands(),
        vec![CommandTarget::Instances(vec!["i-a-001".to_string()])]
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_failed_install_fails_the_batch_and_rolls_back() {
    let cloud = Arc::new(FakeCloud::new("a").with_install_outcome(2, CommandStatus::TimedOut));
    let err = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 3, LaunchMode::Batch)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FleetError::ProvisioningFailure {
            step: PipelineStep::Install,
            ..
        }
    ));
    let terminated = cloud.terminate_calls();
    assert_eq!(terminated.len(), 1);
    assert_eq!(terminated[0], vec!["i-a-001", "i-a-002", "i-a-003"]);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_rolls_back() {
    let cloud = Arc::new(FakeCloud::new("a").with_offline(1));
    let err = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 2, LaunchMode::Batch)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FleetError::ProvisioningFailure {
            step: PipelineStep::CommandReadiness,
            ..
        }
    ));
    assert!(cloud.commands().is_empty());
    assert_eq!(cloud.terminate_calls(), vec![vec!["i-a-001", "i-a-002"]]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_are_classified() {
    let cloud = Arc::new(FakeCloud::rejecting("a"));
    let err = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 1, LaunchMode::Batch)
        .await
        .unwrap_err();
    assert!(err.is_credential_invalid());
}

#[tokio::test]
async fn test_zero_count_launches_nothing() {
    let cloud = Arc::new(FakeCloud::new("a"));
    let records = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 0, LaunchMode::Batch)
        .await
        .unwrap();
    assert!(records.is_empty());
    assert!(cloud.launches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_launch_error_is_a_launch_failure() {
    let cloud = Arc::new(
        FakeCloud::new("a")
            .with_launch_error(CloudError::api("InsufficientInstanceCapacity", "none left")),
    );
    let err = pipeline_for(&cloud)
        .deploy("ami-new", &names(), 1, LaunchMode::Batch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FleetError::ProvisioningFailure {
            step: PipelineStep::Launch,
            ..
        }
    ));
    assert!(cloud.terminate_calls().is_empty());
}
