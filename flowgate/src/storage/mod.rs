//! Persistence, settings and manifests

pub mod manifest;
pub mod memory;
pub mod repos;
pub mod settings;

pub use memory::MemoryStore;
pub use repos::{ApprovalStore, DeploymentStore, ProjectStore, StageStore};
