//! Flowgate - Entry Point
//!
//! Loads a project manifest, requests one deployment and runs the deployer
//! worker until that deployment settles.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::future::{select, Either};

use flowgate::app::options::AppOptions;
use flowgate::app::run::run;
use flowgate::app::state::{AppState, Collaborators};
use flowgate::authz::StaticAuthorization;
use flowgate::deploy::{DeploymentService, LocalShellRunner};
use flowgate::logs::{init_logging, LogOptions};
use flowgate::models::{Deployment, DeploymentRequest, DeploymentStatus};
use flowgate::notify::TracingNotifier;
use flowgate::storage::manifest::Manifest;
use flowgate::storage::settings::Settings;
use flowgate::utils::version_info;

use tracing::{error, info};

const DEFAULT_SETTINGS_FILE: &str = "flowgate.json";
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let settings_path = cli_args
        .get("settings")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = match Settings::load(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file {}: {e}", settings_path.display());
            std::process::exit(2);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    match deploy_once(&settings, &cli_args).await {
        Ok(deployment) => {
            match serde_json::to_string_pretty(&deployment) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to render deployment: {e}"),
            }
            if deployment.status == DeploymentStatus::Failed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Deployment run failed: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn deploy_once(
    settings: &Settings,
    cli_args: &HashMap<String, String>,
) -> anyhow::Result<Deployment> {
    let Some(manifest_path) = cli_args.get("manifest") else {
        bail!("Usage: flowgate --manifest=<file> --project=<id> [--branch=main] [--commit=<sha>] [--message=<text>] [--user=<id>] [--settings=<file>]");
    };
    let Some(project_id) = cli_args.get("project") else {
        bail!("--project=<id> is required");
    };

    let manifest = Manifest::load(&PathBuf::from(manifest_path))
        .with_context(|| format!("loading manifest {}", manifest_path))?;

    let options = AppOptions::from(settings);
    let authz = Arc::new(StaticAuthorization::new());
    let collaborators = Collaborators {
        runner: Arc::new(LocalShellRunner::from(&settings.runner)),
        authz: authz.clone(),
        notifier: Arc::new(TracingNotifier),
    };
    let (state, receiver) = AppState::init(&options, collaborators);
    manifest
        .apply(state.store.as_ref(), &state.registry, &authz)
        .context("applying manifest")?;

    let branch = cli_args.get("branch").map(String::as_str).unwrap_or("main");
    let mut request = DeploymentRequest::new(project_id.as_str(), branch);
    if let Some(commit) = cli_args.get("commit") {
        let message = cli_args.get("message").cloned().unwrap_or_default();
        request = request.commit(commit.as_str(), message);
    }
    if let Some(user) = cli_args.get("user") {
        request = request.by(user.as_str());
    }

    let deployment = state.deployments.request_deployment(request)?;
    if deployment.status == DeploymentStatus::PendingApproval {
        info!(
            "Deployment {} is waiting for approval, not executing",
            deployment.id
        );
        return Ok(deployment);
    }

    let service = state.deployments.clone();
    let id = deployment.id.clone();
    let shutdown = async move {
        let settled = Box::pin(await_settled(service, id));
        let signal = Box::pin(await_shutdown_signal());
        if let Either::Right(_) = select(settled, signal).await {
            info!("Interrupted before the deployment settled");
        }
    };
    run(options, &state, receiver, shutdown).await?;

    Ok(state.deployments.deployment(&deployment.id)?)
}

async fn await_settled(service: DeploymentService, id: String) {
    loop {
        match service.deployment(&id) {
            Ok(deployment) if deployment.status.is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                error!("Lost track of deployment {}: {}", id, e);
                return;
            }
        }
        tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers");
                    std::future::pending::<()>().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
