//! Application wiring: options and command runners

pub mod options;
pub mod run;
