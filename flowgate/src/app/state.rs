//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::authz::AuthorizationProvider;
use crate::deploy::{
    ApprovalGate, CommandRunner, DeploymentQueue, DeploymentReceiver, DeploymentService,
    RollbackSelector, StageExecutor,
};
use crate::notify::NotificationEmitter;
use crate::pipeline::StageRegistry;
use crate::storage::MemoryStore;

/// External systems the orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub authz: Arc<dyn AuthorizationProvider>,
    pub notifier: Arc<dyn NotificationEmitter>,
}

/// Main application state
pub struct AppState {
    /// Backing store for every repository
    pub store: Arc<MemoryStore>,

    pub registry: StageRegistry,
    pub approvals: ApprovalGate,
    pub deployments: DeploymentService,
    pub rollbacks: RollbackSelector,
}

impl AppState {
    /// Wire the components together. The receiver feeds the deployer worker.
    pub fn init(options: &AppOptions, collaborators: Collaborators) -> (Self, DeploymentReceiver) {
        info!("Initializing application state...");

        let store = Arc::new(MemoryStore::new());
        let (queue, receiver) = DeploymentQueue::channel();

        let registry = StageRegistry::new(store.clone());
        let executor = StageExecutor::new(
            collaborators.runner.clone(),
            registry.clone(),
            store.clone(),
        );
        let approvals = ApprovalGate::new(
            store.clone(),
            store.clone(),
            collaborators.authz.clone(),
            collaborators.notifier.clone(),
            queue.clone(),
        );
        let deployments = DeploymentService::new(
            store.clone(),
            store.clone(),
            executor,
            approvals.clone(),
            collaborators.notifier.clone(),
            queue,
        )
        .single_active_deployment(options.single_active_deployment);
        let rollbacks = RollbackSelector::new(
            store.clone(),
            deployments.clone(),
            collaborators.notifier.clone(),
            options.rollback_point_limit,
        );

        let state = Self {
            store,
            registry,
            approvals,
            deployments,
            rollbacks,
        };
        (state, receiver)
    }
}
