//! Flowgate
//!
//! Deployment orchestration core: per-project pipeline stages, approval
//! gating, the deployment state machine and rollback selection.

pub mod app;
pub mod authz;
pub mod deploy;
pub mod errors;
pub mod logs;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod utils;
pub mod workers;
