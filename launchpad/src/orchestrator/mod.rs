//! Session orchestration: state machine, retry policy and the driver

pub mod fsm;
pub mod retry;
pub mod runner;

pub use runner::{Components, Orchestrator};
