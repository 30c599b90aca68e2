//! Onboarding flows: authoring, publishing, and traversal of client
//! onboarding procedures.

pub mod config;
pub mod error;
pub mod flows;
pub mod store;
