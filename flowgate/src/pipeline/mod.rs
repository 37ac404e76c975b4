//! Pipeline stage registry

pub mod commands;
pub mod registry;
pub mod templates;

pub use registry::{PhaseStages, StageRegistry, TemplateOutcome};
