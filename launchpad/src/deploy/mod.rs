//! Deployment module

pub mod executor;
pub mod remote;
