//! Approval authorization

pub mod provider;

pub use provider::{AuthorizationProvider, Capability, StaticAuthorization};
