//! Finite state machine for deployment sessions

use crate::models::session::Stage;

/// Pipeline event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The current stage produced its result
    StageCompleted,

    /// The current stage failed for good
    StageFailed,

    /// Run a finished session again from the start
    Redeploy,
}

/// Compute the stage that follows `current` on `event`
pub fn transition(current: Stage, event: &PipelineEvent) -> Result<Stage, String> {
    let next = match (current, event) {
        // Strictly forward on success
        (Stage::Analyzing, PipelineEvent::StageCompleted) => Stage::Deciding,
        (Stage::Deciding, PipelineEvent::StageCompleted) => Stage::Provisioning,
        (Stage::Provisioning, PipelineEvent::StageCompleted) => Stage::Adapting,
        (Stage::Adapting, PipelineEvent::StageCompleted) => Stage::Deploying,
        (Stage::Deploying, PipelineEvent::StageCompleted) => Stage::Verifying,
        (Stage::Verifying, PipelineEvent::StageCompleted) => Stage::Succeeded,

        // Any working stage may fail
        (stage, PipelineEvent::StageFailed) if !stage.is_terminal() => Stage::Failed,

        // From a terminal state
        (Stage::Succeeded | Stage::Failed, PipelineEvent::Redeploy) => Stage::Analyzing,

        // Invalid transitions
        (stage, event) => {
            return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut stage = Stage::Analyzing;
        let mut visited = vec![stage];
        while !stage.is_terminal() {
            stage = transition(stage, &PipelineEvent::StageCompleted).unwrap();
            visited.push(stage);
        }
        let mut expected = Stage::PIPELINE.to_vec();
        expected.push(Stage::Succeeded);
        assert_eq!(visited, expected);
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(transition(Stage::Succeeded, &PipelineEvent::StageCompleted).is_err());
        assert!(transition(Stage::Failed, &PipelineEvent::StageFailed).is_err());
        assert_eq!(
            transition(Stage::Failed, &PipelineEvent::Redeploy),
            Ok(Stage::Analyzing)
        );
        assert!(transition(Stage::Deploying, &PipelineEvent::Redeploy).is_err());
    }
}
