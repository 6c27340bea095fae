//! Test orchestrator for the electrostatic-fabric test rig.
//!
//! The orchestrator walks a data-driven, ordered list of named actions
//! ([`rig_storage::AlgorithmStep`]), dispatches each to its handler,
//! awaits the appropriate completion signal (protocol ack, pad phase
//! change, robot in-position poll, or timer) and accumulates every
//! measurement into the test record persisted at the end of the run.
//!
//! - [`action`]: the compile-time action registry and algorithm validation
//! - [`params`]: swept test parameters and the per-run planner
//! - [`record`]: the test-record builder
//! - [`runner`]: the run state machine

pub mod action;
pub mod params;
pub mod record;
pub mod runner;

pub use action::{validate_steps, Action, ResolvedStep, ValidationError};
pub use params::{RunPlan, SweptValue, TestParameters};
pub use record::TestRecord;
pub use runner::{
    CompletedRun, Devices, RunError, RunFailure, RunRequest, RunnerConfig, RunnerState,
    StartError, StepEvent, TestRunner,
};
