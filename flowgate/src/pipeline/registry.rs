//! Ordered stage storage per {project, phase}

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::models::{Phase, PipelineStage, StageDefinition};
use crate::pipeline::templates::{self, TemplateSummary};
use crate::storage::StageStore;
use crate::utils::generate_id;

/// The three phase groups of a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseStages {
    pub pre_deploy: Vec<PipelineStage>,
    pub deploy: Vec<PipelineStage>,
    pub post_deploy: Vec<PipelineStage>,
}

impl PhaseStages {
    pub fn get(&self, phase: Phase) -> &[PipelineStage] {
        match phase {
            Phase::PreDeploy => &self.pre_deploy,
            Phase::Deploy => &self.deploy,
            Phase::PostDeploy => &self.post_deploy,
        }
    }
}

/// Result of applying a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOutcome {
    /// Stages appended, in creation order
    Applied {
        template: String,
        stages: Vec<PipelineStage>,
    },

    /// No template with that key; nothing was written
    UnknownTemplate { key: String },
}

impl TemplateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TemplateOutcome::Applied { .. })
    }
}

/// Stage registry
#[derive(Clone)]
pub struct StageRegistry {
    store: Arc<dyn StageStore>,
}

impl StageRegistry {
    pub fn new(store: Arc<dyn StageStore>) -> Self {
        Self { store }
    }

    /// Stages of one group in position order
    pub fn list_stages(
        &self,
        project_id: &str,
        phase: Phase,
    ) -> Result<Vec<PipelineStage>, OrchestratorError> {
        self.store.stage_group(project_id, phase)
    }

    pub fn stages_by_phase(&self, project_id: &str) -> Result<PhaseStages, OrchestratorError> {
        Ok(PhaseStages {
            pre_deploy: self.list_stages(project_id, Phase::PreDeploy)?,
            deploy: self.list_stages(project_id, Phase::Deploy)?,
            post_deploy: self.list_stages(project_id, Phase::PostDeploy)?,
        })
    }

    pub fn stage(&self, id: &str) -> Result<PipelineStage, OrchestratorError> {
        self.store
            .stage(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Stage {}", id)))
    }

    /// Append a stage at the end of its group
    pub fn add_stage(
        &self,
        project_id: &str,
        phase: Phase,
        definition: StageDefinition,
    ) -> Result<PipelineStage, OrchestratorError> {
        if project_id.trim().is_empty() {
            return Err(OrchestratorError::ValidationError(
                "Project is required".to_string(),
            ));
        }
        let definition = definition.validated()?;

        let mut created = None;
        self.store.update_stage_group(project_id, phase, &mut |group| {
            let stage = new_stage(project_id, phase, next_position(group), definition.clone());
            created = Some(stage.clone());
            group.push(stage);
            Ok(())
        })?;

        let stage = created
            .ok_or_else(|| OrchestratorError::Internal("stage was not created".to_string()))?;
        info!(
            "Added stage '{}' to {} of project {} at position {}",
            stage.name, phase, project_id, stage.position
        );
        Ok(stage)
    }

    /// Edit a stage in place; its position is kept
    pub fn update_stage(
        &self,
        id: &str,
        definition: StageDefinition,
    ) -> Result<PipelineStage, OrchestratorError> {
        let definition = definition.validated()?;
        self.modify_stage(id, |stage| {
            stage.name = definition.name.clone();
            stage.commands = definition.commands.clone();
            stage.timeout_seconds = definition.timeout_seconds;
            stage.continue_on_failure = definition.continue_on_failure;
            stage.env = definition.env.clone();
            stage.enabled = definition.enabled;
        })
    }

    /// Flip the enabled flag
    pub fn toggle_stage(&self, id: &str) -> Result<PipelineStage, OrchestratorError> {
        let stage = self.modify_stage(id, |stage| stage.enabled = !stage.enabled)?;
        debug!("Stage {} enabled = {}", stage.id, stage.enabled);
        Ok(stage)
    }

    /// Rewrite positions 0..n-1 in the given order. The ids must be exactly
    /// the current members of the group.
    pub fn reorder_stages<S: AsRef<str>>(
        &self,
        project_id: &str,
        phase: Phase,
        ordered_ids: &[S],
    ) -> Result<Vec<PipelineStage>, OrchestratorError> {
        let ordered: Vec<&str> = ordered_ids.iter().map(|id| id.as_ref()).collect();

        let group = self.store.update_stage_group(project_id, phase, &mut |group| {
            let current: HashSet<&str> = group.iter().map(|s| s.id.as_str()).collect();
            let requested: HashSet<&str> = ordered.iter().copied().collect();
            if requested.len() != ordered.len() {
                return Err(OrchestratorError::ValidationError(
                    "Reorder contains duplicate stage ids".to_string(),
                ));
            }
            if requested != current {
                return Err(OrchestratorError::ValidationError(format!(
                    "Reorder must list exactly the {} stages of {}",
                    current.len(),
                    phase
                )));
            }

            let now = Utc::now();
            for stage in group.iter_mut() {
                if let Some(index) = ordered.iter().position(|id| *id == stage.id) {
                    if stage.position != index as u32 {
                        stage.position = index as u32;
                        stage.updated_at = now;
                    }
                }
            }
            group.sort_by_key(|s| s.position);
            Ok(())
        })?;

        info!("Reordered {} stages of project {}", phase, project_id);
        Ok(group)
    }

    /// Delete a stage and close the gap; returns the remaining siblings
    pub fn remove_stage(&self, id: &str) -> Result<Vec<PipelineStage>, OrchestratorError> {
        let stage = self.stage(id)?;

        let group = self
            .store
            .update_stage_group(&stage.project_id, stage.phase, &mut |group| {
                let before = group.len();
                group.retain(|s| s.id != id);
                if group.len() == before {
                    return Err(OrchestratorError::ConflictError(format!(
                        "Stage {} was already removed",
                        id
                    )));
                }
                repack(group);
                Ok(())
            })?;

        info!("Removed stage '{}' from {} of project {}", stage.name, stage.phase, stage.project_id);
        Ok(group)
    }

    /// Append a template's stages after any existing stages of each phase
    pub fn apply_template(
        &self,
        project_id: &str,
        key: &str,
    ) -> Result<TemplateOutcome, OrchestratorError> {
        let Some(template) = templates::template(key) else {
            info!("Unknown pipeline template '{}', nothing applied", key);
            return Ok(TemplateOutcome::UnknownTemplate {
                key: key.to_string(),
            });
        };

        let mut created = Vec::new();
        for phase in Phase::ALL {
            let definitions = template
                .stages
                .iter()
                .filter(|s| s.phase == phase)
                .map(|s| s.definition().validated())
                .collect::<Result<Vec<_>, _>>()?;
            if definitions.is_empty() {
                continue;
            }

            let mut added = Vec::new();
            self.store.update_stage_group(project_id, phase, &mut |group| {
                added.clear();
                for definition in &definitions {
                    let stage =
                        new_stage(project_id, phase, next_position(group), definition.clone());
                    added.push(stage.clone());
                    group.push(stage);
                }
                Ok(())
            })?;
            created.append(&mut added);
        }

        info!(
            "Applied template '{}' to project {} ({} stages)",
            template.key,
            project_id,
            created.len()
        );
        Ok(TemplateOutcome::Applied {
            template: template.key.to_string(),
            stages: created,
        })
    }

    pub fn templates(&self) -> Vec<TemplateSummary> {
        templates::templates()
    }

    fn modify_stage<F>(&self, id: &str, mut change: F) -> Result<PipelineStage, OrchestratorError>
    where
        F: FnMut(&mut PipelineStage),
    {
        let stage = self.stage(id)?;
        let group = self
            .store
            .update_stage_group(&stage.project_id, stage.phase, &mut |group| {
                let target = group.iter_mut().find(|s| s.id == id).ok_or_else(|| {
                    OrchestratorError::ConflictError(format!("Stage {} was removed", id))
                })?;
                change(target);
                target.updated_at = Utc::now();
                Ok(())
            })?;

        group
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| OrchestratorError::Internal(format!("stage {} vanished", id)))
    }
}

fn next_position(group: &[PipelineStage]) -> u32 {
    group.iter().map(|s| s.position).max().map_or(0, |p| p + 1)
}

fn repack(group: &mut [PipelineStage]) {
    let now = Utc::now();
    group.sort_by_key(|s| s.position);
    for (index, stage) in group.iter_mut().enumerate() {
        if stage.position != index as u32 {
            stage.position = index as u32;
            stage.updated_at = now;
        }
    }
}

fn new_stage(
    project_id: &str,
    phase: Phase,
    position: u32,
    definition: StageDefinition,
) -> PipelineStage {
    let now = Utc::now();
    PipelineStage {
        id: generate_id(),
        project_id: project_id.to_string(),
        phase,
        name: definition.name,
        position,
        commands: definition.commands,
        timeout_seconds: definition.timeout_seconds,
        continue_on_failure: definition.continue_on_failure,
        env: definition.env,
        enabled: definition.enabled,
        created_at: now,
        updated_at: now,
    }
}
