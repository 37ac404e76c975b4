//! Deployment worker
//!
//! Drains the deployment queue and executes each deployment on its own
//! task, with a semaphore bounding how many run at once. Deployments still
//! queued at shutdown are failed rather than left `running`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::{DeploymentReceiver, DeploymentService};

/// Error message of deployments still queued when the worker stops
pub const SHUTDOWN_REASON: &str = "Worker shut down before execution";

/// Deployer worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deployments executing at the same time
    pub max_concurrent_deployments: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent_deployments: 4,
        }
    }
}

/// Run the deployer worker until shutdown or until the queue closes.
/// Deployments already picked up are awaited before returning.
pub async fn run(
    options: &Options,
    service: DeploymentService,
    mut receiver: DeploymentReceiver,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!(
        "Deployer worker starting (max {} concurrent deployments)...",
        options.max_concurrent_deployments
    );

    let permits = Arc::new(Semaphore::new(options.max_concurrent_deployments.max(1)));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_signal => {
                info!("Deployer worker shutting down...");
                break;
            }
            next = receiver.recv() => {
                let Some(id) = next else {
                    info!("Deployment queue closed");
                    break;
                };
                debug!("Picked up deployment {}", id);
                in_flight.spawn(execute(service.clone(), permits.clone(), id));
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Deployment task panicked: {}", e);
                }
            }
        }
    }

    receiver.close();
    let mut abandoned = 0;
    while let Ok(id) = receiver.try_recv() {
        abandoned += 1;
        if let Err(e) = service.abandon(&id, SHUTDOWN_REASON) {
            error!("Failed to abandon deployment {}: {}", id, e);
        }
    }
    if abandoned > 0 {
        warn!("Abandoned {} queued deployments at shutdown", abandoned);
    }

    if !in_flight.is_empty() {
        info!("Waiting for {} deployments to finish...", in_flight.len());
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Deployment task panicked: {}", e);
        }
    }
}

async fn execute(service: DeploymentService, permits: Arc<Semaphore>, id: String) {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            error!("Deployment {} dropped, worker semaphore closed", id);
            return;
        }
    };

    match service.execute(&id).await {
        Ok(deployment) => debug!("Deployment {} settled as {}", deployment.id, deployment.status),
        Err(e) => error!("Failed to execute deployment {}: {}", id, e),
    }
}
