//! Authorization provider contract

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capabilities consulted by the approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Approve deployments of any project
    ApproveAllDeployments,

    /// Approve deployments of projects the actor owns
    ApproveDeployments,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::ApproveAllDeployments => "approve_all_deployments",
            Capability::ApproveDeployments => "approve_deployments",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Permission backend
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn has_capability(&self, actor: &str, capability: Capability) -> bool;

    async fn owns_project(&self, actor: &str, project_id: &str) -> bool;
}

/// In-memory grant table
#[derive(Debug, Default)]
pub struct StaticAuthorization {
    capabilities: RwLock<HashMap<String, HashSet<Capability>>>,
    ownership: RwLock<HashSet<(String, String)>>,
}

impl StaticAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: &str, capability: Capability) -> &Self {
        let mut capabilities = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        capabilities
            .entry(actor.to_string())
            .or_default()
            .insert(capability);
        self
    }

    pub fn revoke(&self, actor: &str, capability: Capability) -> &Self {
        let mut capabilities = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        if let Some(granted) = capabilities.get_mut(actor) {
            granted.remove(&capability);
        }
        self
    }

    pub fn assign_owner(&self, actor: &str, project_id: &str) -> &Self {
        let mut ownership = self.ownership.write().unwrap_or_else(|e| e.into_inner());
        ownership.insert((actor.to_string(), project_id.to_string()));
        self
    }
}

#[async_trait]
impl AuthorizationProvider for StaticAuthorization {
    async fn has_capability(&self, actor: &str, capability: Capability) -> bool {
        let capabilities = self.capabilities.read().unwrap_or_else(|e| e.into_inner());
        capabilities
            .get(actor)
            .is_some_and(|granted| granted.contains(&capability))
    }

    async fn owns_project(&self, actor: &str, project_id: &str) -> bool {
        let ownership = self.ownership.read().unwrap_or_else(|e| e.into_inner());
        ownership.contains(&(actor.to_string(), project_id.to_string()))
    }
}
