//! Approval gate tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_test::assert_ok;

use flowgate::app::options::AppOptions;
use flowgate::app::state::{AppState, Collaborators};
use flowgate::authz::{AuthorizationProvider, Capability, StaticAuthorization};
use flowgate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use flowgate::errors::OrchestratorError;
use flowgate::models::{
    ApprovalAction, ApprovalRules, ApprovalStats, ApprovalStatus, Deployment, DeploymentApproval,
    DeploymentRequest, DeploymentStatus, Project,
};
use flowgate::notify::EventName;
use flowgate::storage::{ApprovalStore, DeploymentStore, MemoryStore, ProjectStore};

use crate::support::{BrokenNotifier, Harness, RecordingNotifier, ScriptedRunner};

fn request(project_id: &str) -> DeploymentRequest {
    DeploymentRequest::new(project_id, "main")
        .by("dev")
        .commit("abc123", "Add checkout")
}

/// Gated deployment of `p-1` requested by `dev`, plus its approval
fn gated(h: &Harness) -> (Deployment, DeploymentApproval) {
    let deployment = h.state.deployments.request_deployment(request("p-1")).unwrap();
    let approval = h
        .state
        .store
        .approval_for_deployment(&deployment.id)
        .unwrap()
        .unwrap();
    (deployment, approval)
}

fn harness() -> Harness {
    let h = Harness::new();
    h.project("p-1", true);
    h.authz
        .grant("lead", Capability::ApproveAllDeployments)
        .grant("owner", Capability::ApproveDeployments)
        .grant("stranger", Capability::ApproveDeployments)
        .assign_owner("owner", "p-1");
    h
}

#[tokio::test]
async fn test_request_parks_deployment() {
    let mut h = harness();
    let (deployment, approval) = gated(&h);

    assert_eq!(deployment.status, DeploymentStatus::PendingApproval);
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(approval.requested_by.as_deref(), Some("dev"));
    assert!(approval.approved_by.is_none());
    assert!(h.queued().is_empty());
    assert_eq!(h.notifier.names(), vec![EventName::ApprovalRequested]);
}

#[tokio::test]
async fn test_global_approver_releases_deployment() {
    let mut h = harness();
    let (deployment, approval) = gated(&h);

    let approved = h
        .state
        .approvals
        .approve(&approval.id, "lead", Some("ship it"))
        .await
        .unwrap();

    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("lead"));
    assert_eq!(approved.notes.as_deref(), Some("ship it"));
    assert!(approved.responded_at.is_some());

    let current = h.state.deployments.deployment(&deployment.id).unwrap();
    assert_eq!(current.status, DeploymentStatus::Running);
    assert_eq!(h.queued(), vec![deployment.id.clone()]);

    let events = h.notifier.events();
    let last = events.last().unwrap();
    assert_eq!(last.name, EventName::Approved);
    assert_eq!(last.actor.as_deref(), Some("lead"));
}

#[tokio::test]
async fn test_scoped_approver_needs_ownership() {
    let mut h = harness();
    let (deployment, approval) = gated(&h);

    let err = h
        .state
        .approvals
        .approve(&approval.id, "stranger", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let unchanged = h.state.store.approval(&approval.id).unwrap().unwrap();
    assert_eq!(unchanged.status, ApprovalStatus::Pending);
    assert!(unchanged.approved_by.is_none());
    assert_eq!(
        h.state.deployments.deployment(&deployment.id).unwrap().status,
        DeploymentStatus::PendingApproval
    );

    assert_ok!(h.state.approvals.approve(&approval.id, "owner", None).await);
    assert_eq!(h.queued().len(), 1);
}

#[tokio::test]
async fn test_actor_without_capability_is_refused() {
    let h = harness();
    let (_, approval) = gated(&h);

    for actor in ["nobody", "dev"] {
        let err = h
            .state
            .approvals
            .reject(&approval.id, actor, "looks risky")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::AuthorizationError(_)));
    }
}

#[tokio::test]
async fn test_requester_cannot_approve_own_deployment() {
    let h = harness();
    h.authz.grant("dev", Capability::ApproveAllDeployments);
    let (_, approval) = gated(&h);

    let err = h
        .state
        .approvals
        .approve(&approval.id, "dev", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));
}

#[tokio::test]
async fn test_note_validation() {
    let h = harness();
    let (_, approval) = gated(&h);
    let long = "x".repeat(1001);

    let cases = vec![
        h.state.approvals.reject(&approval.id, "lead", "   ").await,
        h.state.approvals.reject(&approval.id, "lead", &long).await,
        h.state.approvals.approve(&approval.id, "lead", Some(&long)).await,
    ];
    for result in cases {
        assert!(matches!(result, Err(OrchestratorError::ValidationError(_))));
    }

    let max = "y".repeat(1000);
    assert_ok!(h.state.approvals.reject(&approval.id, "lead", &max).await);
}

#[tokio::test]
async fn test_rejection_fails_deployment_for_good() {
    let mut h = harness();
    let (deployment, approval) = gated(&h);

    let rejected = h
        .state
        .approvals
        .reject(&approval.id, "lead", "Friday freeze")
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.notes.as_deref(), Some("Friday freeze"));

    let current = h.state.deployments.deployment(&deployment.id).unwrap();
    assert_eq!(current.status, DeploymentStatus::Failed);
    assert_eq!(current.error_message.as_deref(), Some("Rejected: Friday freeze"));
    assert!(current.started_at.is_none());

    let err = h
        .state
        .approvals
        .approve(&approval.id, "owner", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictError(_)));
    assert!(h.queued().is_empty());
    assert!(h.notifier.names().contains(&EventName::Rejected));
}

#[tokio::test]
async fn test_second_response_conflicts() {
    let h = harness();
    let (_, approval) = gated(&h);

    h.state.approvals.approve(&approval.id, "lead", None).await.unwrap();
    let err = h
        .state
        .approvals
        .approve(&approval.id, "owner", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictError(_)));

    let stored = h.state.store.approval(&approval.id).unwrap().unwrap();
    assert_eq!(stored.approved_by.as_deref(), Some("lead"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_responses_have_one_winner() {
    for _ in 0..20 {
        let h = harness();
        let (deployment, approval) = gated(&h);

        let gate = h.state.approvals.clone();
        let id = approval.id.clone();
        let approve = tokio::spawn(async move { gate.approve(&id, "lead", None).await });
        let gate = h.state.approvals.clone();
        let id = approval.id.clone();
        let reject = tokio::spawn(async move { gate.reject(&id, "owner", "too late").await });

        let approve = approve.await.unwrap();
        let reject = reject.await.unwrap();
        assert!(
            approve.is_ok() != reject.is_ok(),
            "exactly one response must win: {:?} / {:?}",
            approve,
            reject
        );

        let stored = h.state.store.approval(&approval.id).unwrap().unwrap();
        let current = h.state.deployments.deployment(&deployment.id).unwrap();
        match (approve, reject) {
            (Ok(_), Err(e)) => {
                assert!(matches!(e, OrchestratorError::ConflictError(_)));
                assert_eq!(stored.status, ApprovalStatus::Approved);
                assert_eq!(current.status, DeploymentStatus::Running);
            }
            (Err(e), Ok(_)) => {
                assert!(matches!(e, OrchestratorError::ConflictError(_)));
                assert_eq!(stored.status, ApprovalStatus::Rejected);
                assert_eq!(current.status, DeploymentStatus::Failed);
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_approval_rules_narrow_gating() {
    let mut h = harness();
    let mut project = Project::new("p-2", "Gated on main");
    project.server_id = Some("web-2".to_string());
    project.requires_approval = true;
    project.approval_rules = ApprovalRules {
        environments: Vec::new(),
        branches: vec!["main".to_string()],
    };
    h.save(project);

    let feature = h
        .state
        .deployments
        .request_deployment(DeploymentRequest::new("p-2", "feature/x").by("dev"))
        .unwrap();
    assert_eq!(feature.status, DeploymentStatus::Running);
    assert!(h.state.store.approval_for_deployment(&feature.id).unwrap().is_none());

    let main = h
        .state
        .deployments
        .request_deployment(DeploymentRequest::new("p-2", "main").by("dev"))
        .unwrap();
    assert_eq!(main.status, DeploymentStatus::PendingApproval);
    assert_eq!(h.queued(), vec![feature.id]);
}

#[tokio::test]
async fn test_cancelled_deployment_cannot_be_approved() {
    let mut h = harness();
    let (deployment, approval) = gated(&h);

    h.state.deployments.cancel(&deployment.id, Some("dev")).unwrap();

    let err = h
        .state
        .approvals
        .approve(&approval.id, "lead", None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictError(_)));
    assert_eq!(
        h.state.store.approval(&approval.id).unwrap().unwrap().status,
        ApprovalStatus::Pending
    );
    assert!(h.state.approvals.pending_approvals("lead").await.unwrap().is_empty());
    assert!(h.queued().is_empty());
}

#[tokio::test]
async fn test_pending_approvals_by_scope() {
    let h = harness();
    h.project("p-other", true);
    let (_, mine) = gated(&h);
    let other = h
        .state
        .deployments
        .request_deployment(request("p-other"))
        .unwrap();

    let for_lead = h.state.approvals.pending_approvals("lead").await.unwrap();
    assert_eq!(for_lead.len(), 2);
    assert_eq!(for_lead[0].id, mine.id);
    assert_eq!(for_lead[1].deployment_id, other.id);

    let for_owner = h.state.approvals.pending_approvals("owner").await.unwrap();
    assert_eq!(for_owner.len(), 1);
    assert_eq!(for_owner[0].id, mine.id);

    assert!(h.state.approvals.pending_approvals("nobody").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_approval_stats() {
    let h = harness();
    h.project("p-other", true);
    let (_, first) = gated(&h);
    let (_, second) = gated(&h);
    h.state.deployments.request_deployment(request("p-other")).unwrap();

    h.state.approvals.approve(&first.id, "lead", None).await.unwrap();
    h.state.approvals.reject(&second.id, "lead", "duplicate").await.unwrap();

    let all = h.state.approvals.approval_stats(None).await.unwrap();
    assert_eq!(
        all,
        ApprovalStats {
            pending: 1,
            approved: 1,
            rejected: 1,
            total: 3
        }
    );

    let owned = h.state.approvals.approval_stats(Some("owner")).await.unwrap();
    assert_eq!(owned.total, 2);
    assert_eq!(owned.pending, 0);
}

#[tokio::test]
async fn test_notification_failure_does_not_undo_approval() {
    let authz = Arc::new(StaticAuthorization::new());
    authz.grant("lead", Capability::ApproveAllDeployments);
    let (state, mut receiver) = AppState::init(
        &AppOptions::default(),
        Collaborators {
            runner: Arc::new(ScriptedRunner::default()),
            authz: authz.clone(),
            notifier: Arc::new(BrokenNotifier),
        },
    );
    let mut project = Project::new("p-1", "Shop");
    project.server_id = Some("web-1".to_string());
    project.requires_approval = true;
    state.store.save_project(project).unwrap();

    let deployment = state.deployments.request_deployment(request("p-1")).unwrap();
    let approval = state
        .store
        .approval_for_deployment(&deployment.id)
        .unwrap()
        .unwrap();

    let approved = state.approvals.approve(&approval.id, "lead", None).await.unwrap();
    assert_eq!(approved.status, ApprovalStatus::Approved);
    assert_eq!(receiver.try_recv().unwrap(), deployment.id);
}

/// Grants everything, cancelling a deployment while it is being consulted
#[derive(Default)]
struct CancellingAuthz {
    target: Mutex<Option<(Arc<MemoryStore>, String)>>,
}

#[async_trait]
impl AuthorizationProvider for CancellingAuthz {
    async fn has_capability(&self, _actor: &str, _capability: Capability) -> bool {
        let target = self.target.lock().unwrap().take();
        if let Some((store, id)) = target {
            store
                .update_deployment(&id, &mut |d| d.process(DeploymentEvent::Cancel))
                .unwrap();
        }
        true
    }

    async fn owns_project(&self, _actor: &str, _project_id: &str) -> bool {
        true
    }
}

#[tokio::test]
async fn test_cancel_during_authorization_blocks_response() {
    let authz = Arc::new(CancellingAuthz::default());
    let (state, mut receiver) = AppState::init(
        &AppOptions::default(),
        Collaborators {
            runner: Arc::new(ScriptedRunner::default()),
            authz: authz.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
        },
    );
    let mut project = Project::new("p-1", "Shop");
    project.server_id = Some("web-1".to_string());
    project.requires_approval = true;
    state.store.save_project(project).unwrap();

    for respond_with_approval in [true, false] {
        let deployment = state.deployments.request_deployment(request("p-1")).unwrap();
        let approval = state
            .store
            .approval_for_deployment(&deployment.id)
            .unwrap()
            .unwrap();
        *authz.target.lock().unwrap() = Some((state.store.clone(), deployment.id.clone()));

        let result = if respond_with_approval {
            state.approvals.approve(&approval.id, "lead", None).await
        } else {
            state.approvals.reject(&approval.id, "lead", "no").await
        };

        assert!(
            matches!(result, Err(OrchestratorError::ConflictError(_))),
            "{:?}",
            result
        );
        let stored = state.store.approval(&approval.id).unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Pending);
        assert!(stored.approved_by.is_none());
        assert_eq!(stored.audit.len(), 1);
        assert_eq!(
            state.deployments.deployment(&deployment.id).unwrap().status,
            DeploymentStatus::Cancelled
        );
    }
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn test_request_approval_needs_a_pending_deployment() {
    let h = harness();
    h.project("p-open", false);

    let running = h
        .state
        .deployments
        .request_deployment(request("p-open"))
        .unwrap();
    let err = h.state.approvals.request_approval(&running.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictError(_)));
    assert!(h.state.store.approval_for_deployment(&running.id).unwrap().is_none());
    assert_eq!(
        h.state.deployments.deployment(&running.id).unwrap().status,
        DeploymentStatus::Running
    );

    let (deployment, _) = gated(&h);
    let err = h.state.approvals.request_approval(&deployment.id).unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictError(_)));
    assert_eq!(h.state.store.approvals().unwrap().len(), 1);

    let err = h.state.approvals.request_approval("missing").unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_audit_trail_records_each_action() {
    let h = harness();
    let (_, first) = gated(&h);
    let (_, second) = gated(&h);

    let approved = h.state.approvals.approve(&first.id, "lead", None).await.unwrap();
    let rejected = h
        .state
        .approvals
        .reject(&second.id, "owner", "wrong branch")
        .await
        .unwrap();

    let trail = |approval: &DeploymentApproval| {
        approval
            .audit
            .iter()
            .map(|e| (e.action, e.actor.clone(), e.from_status, e.to_status))
            .collect::<Vec<_>>()
    };
    let requested = (
        ApprovalAction::Requested,
        Some("dev".to_string()),
        DeploymentStatus::Pending,
        DeploymentStatus::PendingApproval,
    );
    assert_eq!(
        trail(&approved),
        vec![
            requested.clone(),
            (
                ApprovalAction::Approved,
                Some("lead".to_string()),
                DeploymentStatus::PendingApproval,
                DeploymentStatus::Running
            ),
        ]
    );
    assert_eq!(
        trail(&rejected),
        vec![
            requested,
            (
                ApprovalAction::Rejected,
                Some("owner".to_string()),
                DeploymentStatus::PendingApproval,
                DeploymentStatus::Failed
            ),
        ]
    );
}
