//! Domain models

pub mod adaptation;
pub mod framework;
pub mod infra;
pub mod plan;
pub mod request;
pub mod session;
pub mod snapshot;
