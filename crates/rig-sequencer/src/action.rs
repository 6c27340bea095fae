//! Action registry and algorithm validation.
//!
//! Algorithm steps name their action as a string; the registry maps those
//! strings to the [`Action`] enum at validation time, before anything
//! dispatches. An unknown name is a configuration error of the algorithm,
//! never a run-time surprise.

use thiserror::Error;

use rig_storage::AlgorithmStep;

/// Everything the orchestrator knows how to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Configure the pad and robot for this run.
    Setup,
    /// Record ambient temperature and humidity.
    CheckEnvironment,
    /// Command the robot to a position and poll until it arrives.
    RobotMove,
    /// Like `RobotMove`, but the target is approached with the program's
    /// touch-skip search.
    RobotTouchSkip,
    /// Capture a photo through the camera collaborator.
    TakePhoto,
    /// Read the scale.
    GetWeight,
    /// Read the electric-field meter.
    ReadField,
    /// Start the pad cycle and wait until charging has finished.
    ChargeFabric,
    /// Wait until the pad reports the fabric loaded.
    LoadFabric,
    /// Wait the duration given by the step parameter (milliseconds).
    Wait,
    /// Wait the configured observation duration.
    Observe,
    /// Release the fabric and return the pad to standby.
    ReleaseFabric,
    /// Freeze and persist the test record.
    Finish,
}

impl Action {
    /// Resolve an action name. `Start` is accepted as the customary alias
    /// for the setup step at the head of an algorithm.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Setup" | "Start" => Some(Action::Setup),
            "CheckEnvironment" => Some(Action::CheckEnvironment),
            "RobotMove" => Some(Action::RobotMove),
            "RobotTouchSkip" => Some(Action::RobotTouchSkip),
            "TakePhoto" => Some(Action::TakePhoto),
            "GetWeight" => Some(Action::GetWeight),
            "ReadField" => Some(Action::ReadField),
            "ChargeFabric" => Some(Action::ChargeFabric),
            "LoadFabric" => Some(Action::LoadFabric),
            "Wait" => Some(Action::Wait),
            "Observe" => Some(Action::Observe),
            "ReleaseFabric" => Some(Action::ReleaseFabric),
            "Finish" => Some(Action::Finish),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Setup => "Setup",
            Action::CheckEnvironment => "CheckEnvironment",
            Action::RobotMove => "RobotMove",
            Action::RobotTouchSkip => "RobotTouchSkip",
            Action::TakePhoto => "TakePhoto",
            Action::GetWeight => "GetWeight",
            Action::ReadField => "ReadField",
            Action::ChargeFabric => "ChargeFabric",
            Action::LoadFabric => "LoadFabric",
            Action::Wait => "Wait",
            Action::Observe => "Observe",
            Action::ReleaseFabric => "ReleaseFabric",
            Action::Finish => "Finish",
        }
    }
}

/// A validated step, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    /// 0-based position in the run.
    pub index: usize,
    pub action: Action,
    pub parameter: String,
}

/// Why an algorithm failed validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("algorithm has no steps")]
    Empty,
    #[error("step {step}: no handler registered for action '{name}'")]
    UnknownAction { step: usize, name: String },
}

/// Resolve every step of an algorithm, in order, rejecting unknown action
/// names before anything runs.
pub fn validate_steps(steps: &[AlgorithmStep]) -> Result<Vec<ResolvedStep>, ValidationError> {
    if steps.is_empty() {
        return Err(ValidationError::Empty);
    }
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| match Action::from_name(&step.action) {
            Some(action) => Ok(ResolvedStep {
                index,
                action,
                parameter: step.parameter.clone(),
            }),
            None => Err(ValidationError::UnknownAction {
                step: index,
                name: step.action.clone(),
            }),
        })
        .collect()
}
