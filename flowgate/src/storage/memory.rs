//! In-memory store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::errors::OrchestratorError;
use crate::models::{Deployment, DeploymentApproval, Phase, PipelineStage, Project};
use crate::storage::repos::{
    ApprovalStore, ApprovalUpdate, DeploymentPrecondition, DeploymentStore, DeploymentUpdate,
    ProjectStore, StageGroupUpdate, StageStore,
};

type GroupKey = (String, Phase);

/// A record plus its insertion sequence, used to break timestamp ties
#[derive(Debug, Clone)]
struct Entry<T> {
    seq: u64,
    record: T,
}

#[derive(Default)]
struct StageTables {
    groups: HashMap<GroupKey, Vec<PipelineStage>>,
    index: HashMap<String, GroupKey>,
}

/// In-memory implementation of every repository
#[derive(Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    stages: RwLock<StageTables>,
    deployments: RwLock<HashMap<String, Entry<Deployment>>>,
    approvals: RwLock<HashMap<String, Entry<DeploymentApproval>>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }
}

impl ProjectStore for MemoryStore {
    fn project(&self, id: &str) -> Result<Option<Project>, OrchestratorError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        Ok(projects.get(id).cloned())
    }

    fn projects(&self) -> Result<Vec<Project>, OrchestratorError> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Project> = projects.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn save_project(&self, project: Project) -> Result<(), OrchestratorError> {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        projects.insert(project.id.clone(), project);
        Ok(())
    }
}

impl StageStore for MemoryStore {
    fn stage_group(
        &self,
        project_id: &str,
        phase: Phase,
    ) -> Result<Vec<PipelineStage>, OrchestratorError> {
        let tables = self.stages.read().unwrap_or_else(|e| e.into_inner());
        let mut group = tables
            .groups
            .get(&(project_id.to_string(), phase))
            .cloned()
            .unwrap_or_default();
        group.sort_by_key(|s| s.position);
        Ok(group)
    }

    fn stage(&self, id: &str) -> Result<Option<PipelineStage>, OrchestratorError> {
        let tables = self.stages.read().unwrap_or_else(|e| e.into_inner());
        let stage = tables
            .index
            .get(id)
            .and_then(|key| tables.groups.get(key))
            .and_then(|group| group.iter().find(|s| s.id == id))
            .cloned();
        Ok(stage)
    }

    fn update_stage_group(
        &self,
        project_id: &str,
        phase: Phase,
        update: StageGroupUpdate<'_>,
    ) -> Result<Vec<PipelineStage>, OrchestratorError> {
        let mut tables = self.stages.write().unwrap_or_else(|e| e.into_inner());
        let key = (project_id.to_string(), phase);

        let mut group = tables.groups.get(&key).cloned().unwrap_or_default();
        group.sort_by_key(|s| s.position);
        update(&mut group)?;

        if let Some(stale) = tables.groups.get(&key) {
            let stale_ids: Vec<String> = stale.iter().map(|s| s.id.clone()).collect();
            for id in stale_ids {
                tables.index.remove(&id);
            }
        }
        for stage in &group {
            tables.index.insert(stage.id.clone(), key.clone());
        }

        group.sort_by_key(|s| s.position);
        tables.groups.insert(key, group.clone());
        Ok(group)
    }
}

impl DeploymentStore for MemoryStore {
    fn insert_deployment(
        &self,
        deployment: Deployment,
        precondition: DeploymentPrecondition<'_>,
    ) -> Result<(), OrchestratorError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());
        if deployments.contains_key(&deployment.id) {
            return Err(OrchestratorError::ConflictError(format!(
                "Deployment {} already exists",
                deployment.id
            )));
        }

        let siblings: Vec<Deployment> = deployments
            .values()
            .filter(|e| e.record.project_id == deployment.project_id)
            .map(|e| e.record.clone())
            .collect();
        precondition(siblings.as_slice())?;

        let seq = self.next_seq();
        deployments.insert(
            deployment.id.clone(),
            Entry {
                seq,
                record: deployment,
            },
        );
        Ok(())
    }

    fn deployment(&self, id: &str) -> Result<Option<Deployment>, OrchestratorError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        Ok(deployments.get(id).map(|e| e.record.clone()))
    }

    fn project_deployments(
        &self,
        project_id: &str,
    ) -> Result<Vec<Deployment>, OrchestratorError> {
        let deployments = self.deployments.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Entry<Deployment>> = deployments
            .values()
            .filter(|e| e.record.project_id == project_id)
            .collect();
        entries.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(entries.into_iter().map(|e| e.record.clone()).collect())
    }

    fn update_deployment(
        &self,
        id: &str,
        update: DeploymentUpdate<'_>,
    ) -> Result<Deployment, OrchestratorError> {
        let mut deployments = self.deployments.write().unwrap_or_else(|e| e.into_inner());
        let entry = deployments
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("Deployment {}", id)))?;

        let mut draft = entry.record.clone();
        update(&mut draft)?;
        entry.record = draft.clone();
        Ok(draft)
    }
}

impl ApprovalStore for MemoryStore {
    fn insert_approval(&self, approval: DeploymentApproval) -> Result<(), OrchestratorError> {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        if approvals.contains_key(&approval.id) {
            return Err(OrchestratorError::ConflictError(format!(
                "Approval {} already exists",
                approval.id
            )));
        }
        let seq = self.next_seq();
        approvals.insert(
            approval.id.clone(),
            Entry {
                seq,
                record: approval,
            },
        );
        Ok(())
    }

    fn approval(&self, id: &str) -> Result<Option<DeploymentApproval>, OrchestratorError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        Ok(approvals.get(id).map(|e| e.record.clone()))
    }

    fn approval_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentApproval>, OrchestratorError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        Ok(approvals
            .values()
            .find(|e| e.record.deployment_id == deployment_id)
            .map(|e| e.record.clone()))
    }

    fn approvals(&self) -> Result<Vec<DeploymentApproval>, OrchestratorError> {
        let approvals = self.approvals.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Entry<DeploymentApproval>> = approvals.values().collect();
        entries.sort_by(|a, b| {
            a.record
                .requested_at
                .cmp(&b.record.requested_at)
                .then(a.seq.cmp(&b.seq))
        });
        Ok(entries.into_iter().map(|e| e.record.clone()).collect())
    }

    fn update_approval(
        &self,
        id: &str,
        update: ApprovalUpdate<'_>,
    ) -> Result<DeploymentApproval, OrchestratorError> {
        let mut approvals = self.approvals.write().unwrap_or_else(|e| e.into_inner());
        let entry = approvals
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("Approval {}", id)))?;

        let mut draft = entry.record.clone();
        update(&mut draft)?;
        entry.record = draft.clone();
        Ok(draft)
    }
}
