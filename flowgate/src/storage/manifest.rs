//! Project manifest
//!
//! Declares projects, their pipelines and who may approve what. Stages are
//! created through the registry so seeded pipelines obey the same rules as
//! authored ones.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::authz::{Capability, StaticAuthorization};
use crate::errors::OrchestratorError;
use crate::models::{Phase, Project, StageDefinition};
use crate::pipeline::{StageRegistry, TemplateOutcome};
use crate::pipeline::commands::normalize_commands;
use crate::storage::ProjectStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub projects: Vec<ProjectManifest>,

    /// Capabilities per actor
    #[serde(default)]
    pub grants: BTreeMap<String, Vec<Capability>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    #[serde(flatten)]
    pub project: Project,

    #[serde(default)]
    pub owner: Option<String>,

    /// Template keys applied in order before `stages`
    #[serde(default)]
    pub templates: Vec<String>,

    #[serde(default)]
    pub stages: Vec<ManifestStage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestStage {
    pub phase: Phase,
    pub name: String,
    pub commands: Commands,

    #[serde(default)]
    pub timeout_seconds: Option<u32>,

    #[serde(default)]
    pub continue_on_failure: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Commands as a multi-line script or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Commands {
    Script(String),
    List(Vec<String>),
}

impl Commands {
    fn normalized(&self) -> Vec<String> {
        match self {
            Commands::Script(raw) => normalize_commands(raw),
            Commands::List(lines) => normalize_commands(&lines.join("\n")),
        }
    }
}

impl ManifestStage {
    fn definition(&self) -> StageDefinition {
        let mut definition = StageDefinition::new(self.name.clone(), "")
            .continue_on_failure(self.continue_on_failure)
            .enabled(self.enabled.unwrap_or(true));
        definition.commands = self.commands.normalized();
        if let Some(timeout) = self.timeout_seconds {
            definition = definition.timeout(timeout);
        }
        for (key, value) in &self.env {
            definition = definition.env_var(key.clone(), value.clone());
        }
        definition
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let contents = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&contents)?;
        Ok(manifest)
    }

    /// Seed projects, pipelines and grants
    pub fn apply(
        &self,
        projects: &dyn ProjectStore,
        registry: &StageRegistry,
        authz: &StaticAuthorization,
    ) -> Result<(), OrchestratorError> {
        for (actor, capabilities) in &self.grants {
            for capability in capabilities {
                authz.grant(actor, *capability);
            }
        }

        for entry in &self.projects {
            let project = &entry.project;
            projects.save_project(project.clone())?;
            if let Some(owner) = &entry.owner {
                authz.assign_owner(owner, &project.id);
            }

            for key in &entry.templates {
                if let TemplateOutcome::UnknownTemplate { key } =
                    registry.apply_template(&project.id, key)?
                {
                    warn!("Project {} lists unknown template '{}'", project.id, key);
                }
            }

            for stage in &entry.stages {
                registry
                    .add_stage(&project.id, stage.phase, stage.definition())
                    .map_err(|e| {
                        OrchestratorError::ConfigError(format!(
                            "Project {} stage '{}': {}",
                            project.id, stage.name, e
                        ))
                    })?;
            }

            info!("Loaded project {} ({})", project.id, project.name);
        }

        Ok(())
    }
}
