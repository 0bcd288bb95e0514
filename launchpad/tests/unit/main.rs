mod common;
mod test_adapter;
mod test_analyzer;
mod test_fsm;
mod test_orchestrator;
mod test_provision;
mod test_strategy;
