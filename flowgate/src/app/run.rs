//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::deploy::DeploymentReceiver;
use crate::errors::OrchestratorError;
use crate::workers::deployer;

/// Run the deployer worker until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    state: &AppState,
    receiver: DeploymentReceiver,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OrchestratorError> {
    info!("Starting flowgate...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    let deployer_handle = init_deployer_worker(
        options.deployer.clone(),
        state,
        receiver,
        shutdown_tx.subscribe(),
    );
    shutdown_manager.with_deployer_worker_handle(deployer_handle)?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    shutdown_manager.shutdown().await
}

fn init_deployer_worker(
    options: deployer::Options,
    state: &AppState,
    receiver: DeploymentReceiver,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!("Initializing deployer worker...");

    let service = state.deployments.clone();
    tokio::spawn(async move {
        deployer::run(
            &options,
            service,
            receiver,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>,
        )
        .await;
    })
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    deployer_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            deployer_worker_handle: None,
        }
    }

    fn with_deployer_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), OrchestratorError> {
        if self.deployer_worker_handle.is_some() {
            return Err(OrchestratorError::Internal("deployer_handle already set".to_string()));
        }
        self.deployer_worker_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), OrchestratorError> {
        let _ = self.shutdown_tx.send(());

        let Some(handle) = self.deployer_worker_handle.take() else {
            return Ok(());
        };
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.max_shutdown_delay, handle).await {
            Ok(joined) => {
                joined.map_err(|e| OrchestratorError::Internal(e.to_string()))?;
                info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, abandoning running deployments",
                    self.max_shutdown_delay
                );
                abort.abort();
                Err(OrchestratorError::Internal("shutdown timed out".to_string()))
            }
        }
    }
}
