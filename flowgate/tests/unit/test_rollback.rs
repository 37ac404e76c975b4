//! Rollback selector tests

use flowgate::app::options::AppOptions;
use flowgate::errors::OrchestratorError;
use flowgate::models::{Deployment, DeploymentRequest, DeploymentStatus, Phase, TriggerSource};
use flowgate::notify::EventName;

use crate::support::{Harness, Step};

/// Request and execute a deployment of `p-1`
async fn deploy(h: &mut Harness, commit: &str, user: Option<&str>) -> Deployment {
    let mut request = DeploymentRequest::new("p-1", "main").commit(commit, format!("commit {}", commit));
    if let Some(user) = user {
        request = request.by(user);
    }
    h.state.deployments.request_deployment(request).unwrap();
    h.run_queued().await.remove(0)
}

fn harness() -> Harness {
    let h = Harness::new();
    h.project("p-1", false);
    h.stage("p-1", Phase::Deploy, "Ship", "deploy.sh");
    h
}

#[tokio::test]
async fn test_points_are_successful_deployments_newest_first() {
    let mut h = harness();
    let first = deploy(&mut h, "aaa", Some("alice")).await;
    h.runner.on("deploy.sh", Step::Exit(1, ""));
    let failed = deploy(&mut h, "bbb", Some("alice")).await;
    h.runner.on("deploy.sh", Step::Exit(0, ""));
    let third = deploy(&mut h, "ccc", None).await;
    assert_eq!(failed.status, DeploymentStatus::Failed);

    let points = h.state.rollbacks.list_rollback_points("p-1", None).unwrap();
    let ids: Vec<&str> = points.iter().map(|p| p.deployment_id.as_str()).collect();
    assert_eq!(ids, vec![third.id.as_str(), first.id.as_str()]);

    assert!(points[0].is_current);
    assert!(!points[0].can_rollback);
    assert_eq!(points[0].deployed_by, "System");

    assert!(!points[1].is_current);
    assert!(points[1].can_rollback);
    assert_eq!(points[1].deployed_by, "alice");
    assert_eq!(points[1].commit_hash.as_deref(), Some("aaa"));
}

#[tokio::test]
async fn test_limit_truncates_points() {
    let options = AppOptions {
        rollback_point_limit: 2,
        ..Default::default()
    };
    let mut h = Harness::with_options(options);
    h.project("p-1", false);
    for commit in ["a", "b", "c", "d"] {
        deploy(&mut h, commit, None).await;
    }

    assert_eq!(h.state.rollbacks.list_rollback_points("p-1", None).unwrap().len(), 2);
    assert_eq!(h.state.rollbacks.list_rollback_points("p-1", Some(3)).unwrap().len(), 3);
}

#[tokio::test]
async fn test_ineligible_targets() {
    let mut h = harness();
    let only = deploy(&mut h, "aaa", None).await;

    // The single successful deployment is current
    let points = h.state.rollbacks.list_rollback_points("p-1", None).unwrap();
    assert_eq!(points.len(), 1);
    assert!(!points[0].can_rollback);
    let err = h.state.rollbacks.rollback_to(&only.id, None).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotEligibleError(_)));

    h.runner.on("deploy.sh", Step::Exit(1, ""));
    let failed = deploy(&mut h, "bbb", None).await;
    let err = h.state.rollbacks.rollback_to(&failed.id, None).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotEligibleError(_)));

    let err = h.state.rollbacks.rollback_to("missing", None).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_rollback_creates_linked_deployment() {
    let mut h = harness();
    let first = deploy(&mut h, "aaa", Some("alice")).await;
    let second = deploy(&mut h, "bbb", Some("alice")).await;

    let rollback = h.state.rollbacks.rollback_to(&first.id, Some("ops")).unwrap();

    assert_eq!(rollback.status, DeploymentStatus::Running);
    assert_eq!(rollback.triggered_by, TriggerSource::Rollback);
    assert_eq!(rollback.rollback_source_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(rollback.commit_hash.as_deref(), Some("aaa"));
    assert_eq!(rollback.commit_message.as_deref(), Some("Rollback to: commit aaa"));
    assert_eq!(rollback.branch, "main");
    assert_eq!(rollback.user_id.as_deref(), Some("ops"));
    assert_eq!(h.notifier.names().last(), Some(&EventName::RollbackRequested));

    let done = h.run_queued().await.remove(0);
    assert_eq!(done.id, rollback.id);
    assert_eq!(done.status, DeploymentStatus::Success);

    // The rollback is current but never itself a rollback point
    let points = h.state.rollbacks.list_rollback_points("p-1", None).unwrap();
    let ids: Vec<&str> = points.iter().map(|p| p.deployment_id.as_str()).collect();
    assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    assert!(points.iter().all(|p| p.can_rollback && !p.is_current));

    let err = h.state.rollbacks.rollback_to(&rollback.id, None).unwrap_err();
    assert!(matches!(err, OrchestratorError::NotEligibleError(_)));
}

#[tokio::test]
async fn test_rollback_goes_through_approval() {
    let mut h = harness();
    let first = deploy(&mut h, "aaa", None).await;
    deploy(&mut h, "bbb", None).await;

    // Gate the project after the fact
    h.project("p-1", true);

    let rollback = h.state.rollbacks.rollback_to(&first.id, Some("ops")).unwrap();
    assert_eq!(rollback.status, DeploymentStatus::PendingApproval);
    assert!(h.queued().is_empty());
}
