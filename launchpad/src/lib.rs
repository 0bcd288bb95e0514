//! Launchpad Library
//!
//! Turns a source repository into a running cloud deployment: analysis,
//! strategy selection, provisioning, source adaptation, remote execution and
//! the orchestrator that drives a persisted session through those stages.

pub mod adapt;
pub mod analyzer;
pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod locks;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod provision;
pub mod storage;
pub mod strategy;
pub mod utils;
