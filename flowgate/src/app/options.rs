//! Application configuration options

use std::time::Duration;

use crate::storage::settings::{RunnerSettings, Settings};
use crate::workers::deployer;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Deployer worker options
    pub deployer: deployer::Options,

    /// Local command runner
    pub runner: RunnerSettings,

    /// Default number of rollback points listed
    pub rollback_point_limit: usize,

    /// One gated or running deployment per project
    pub single_active_deployment: bool,

    /// Maximum wait for in-flight deployments on shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for AppOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            deployer: deployer::Options {
                max_concurrent_deployments: settings.worker.max_concurrent_deployments,
            },
            runner: settings.runner.clone(),
            rollback_point_limit: settings.rollback_point_limit,
            single_active_deployment: settings.single_active_deployment,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}
