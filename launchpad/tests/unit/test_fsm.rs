//! Session state machine tests

use launchpad::models::session::Stage;
use launchpad::orchestrator::fsm::{transition, PipelineEvent};

#[test]
fn test_fsm_success_path() {
    let mut stage = Stage::Analyzing;
    for expected in [
        Stage::Deciding,
        Stage::Provisioning,
        Stage::Adapting,
        Stage::Deploying,
        Stage::Verifying,
        Stage::Succeeded,
    ] {
        stage = transition(stage, &PipelineEvent::StageCompleted).unwrap();
        assert_eq!(stage, expected);
    }
}

#[test]
fn test_fsm_any_working_stage_can_fail() {
    for stage in Stage::PIPELINE {
        assert_eq!(
            transition(stage, &PipelineEvent::StageFailed),
            Ok(Stage::Failed)
        );
    }
}

#[test]
fn test_fsm_invalid_transitions() {
    assert!(transition(Stage::Succeeded, &PipelineEvent::StageFailed).is_err());
    assert!(transition(Stage::Failed, &PipelineEvent::StageCompleted).is_err());
    assert!(transition(Stage::Analyzing, &PipelineEvent::Redeploy).is_err());
}

#[test]
fn test_fsm_redeploy_restarts_finished_sessions() {
    assert_eq!(
        transition(Stage::Succeeded, &PipelineEvent::Redeploy),
        Ok(Stage::Analyzing)
    );
    assert_eq!(
        transition(Stage::Failed, &PipelineEvent::Redeploy),
        Ok(Stage::Analyzing)
    );
}
