//! The run state machine.
//!
//! One runner instance owns everything a run needs: the device handles,
//! the step timers, the event channel and the record under construction.
//! Steps execute strictly one at a time on the run loop's task; every
//! completion signal (protocol ack, pad phase change, in-position poll,
//! timer) is awaited there, so a step can never be advanced twice and no
//! notification races another.
//!
//! ```text
//! ┌──────┐    run()     ┌─────────┐
//! │ Idle │─────────────▶│ Running │──── step loop ───┐
//! └──────┘              └────┬────┘                  │
//!    ▲                       │ abort()               │
//!    │                       ▼                       │
//!    │                  ┌──────────┐                 │
//!    │◀─────────────────│ Aborting │◀────────────────┘
//!    │                  └──────────┘   error / abort
//!    └── completed (record persisted either way)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info, warn};

use rig_core::capabilities::{
    EnvironmentSensor, FieldSensor, PadControl, PhotoCapture, WeightScale,
};
use rig_core::config::RobotRegisters;
use rig_core::data::{pad_registers, PadPhase};
use rig_robot::{RobotApi, RobotPosition};
use rig_storage::{Repository, Test};

use crate::action::{validate_steps, Action, ResolvedStep, ValidationError};
use crate::params::{RunPlan, TestParameters};
use crate::record::TestRecord;

/// Runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Aborting,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Idle => write!(f, "idle"),
            RunnerState::Running => write!(f, "running"),
            RunnerState::Aborting => write!(f, "aborting"),
        }
    }
}

/// The device handles one run sequences over.
#[derive(Clone)]
pub struct Devices {
    pub pad: Arc<dyn PadControl>,
    pub scale: Arc<dyn WeightScale>,
    pub environment: Arc<dyn EnvironmentSensor>,
    pub field: Arc<dyn FieldSensor>,
    pub camera: Arc<dyn PhotoCapture>,
    pub robot: Arc<dyn RobotApi>,
}

/// Timings and robot register wiring for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub registers: RobotRegisters,
    /// In-position poll period.
    pub poll_period: Duration,
    /// Bound on one robot motion.
    pub move_timeout: Duration,
    /// Bound on one scale/field round-trip.
    pub device_timeout: Duration,
    /// Bound on one pad phase transition.
    pub phase_timeout: Duration,
    /// Release settle time before the pad returns to standby.
    pub release_settle: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            registers: RobotRegisters::default(),
            poll_period: Duration::from_millis(100),
            move_timeout: Duration::from_secs(60),
            device_timeout: Duration::from_secs(5),
            phase_timeout: Duration::from_secs(120),
            release_settle: Duration::from_secs(1),
        }
    }
}

/// Why a run refused to start. Nothing has dispatched and no record
/// exists when one of these comes back.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("a run is already in progress")]
    Busy,
    #[error("scale weight is zero or unknown")]
    WeightIsZero,
    #[error(transparent)]
    InvalidAlgorithm(#[from] ValidationError),
    #[error("repository error: {0}")]
    Repository(String),
}

/// Why a live run aborted. The partial record has been handed to the
/// repository by the time one of these comes back.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("step {step} ({action}): malformed parameter '{parameter}'")]
    BadParameter {
        step: usize,
        action: &'static str,
        parameter: String,
    },
    #[error("step {step} ({action}): device unavailable: {source}")]
    Device {
        step: usize,
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("run aborted at step {step}")]
    Aborted { step: usize },
    #[error("failed to persist test record: {0}")]
    Persistence(String),
}

/// Either failure layer of [`TestRunner::run`].
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Start(#[from] StartError),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Step progress published for the UI layer.
#[derive(Debug, Clone)]
pub enum StepEvent {
    Started {
        index: usize,
        action: &'static str,
    },
    Completed {
        index: usize,
        action: &'static str,
        result: String,
    },
    Failed {
        index: usize,
        message: String,
    },
    Finished {
        test_id: i64,
    },
}

/// One run to execute.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub algorithm_id: i64,
    pub batch_id: i64,
    pub name: String,
    pub parameters: TestParameters,
    /// 1-based run counter inside the batch.
    pub counter: u32,
}

/// A successfully persisted run.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub test_id: i64,
    pub test: Test,
}

/// The test orchestrator.
pub struct TestRunner {
    devices: Devices,
    repository: Arc<dyn Repository>,
    config: RunnerConfig,
    events: broadcast::Sender<StepEvent>,
    position_tx: watch::Sender<RobotPosition>,
    state: RwLock<RunnerState>,
    abort_requested: AtomicBool,
}

impl TestRunner {
    pub fn new(devices: Devices, repository: Arc<dyn Repository>, config: RunnerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let (position_tx, _) = watch::channel(RobotPosition::unknown());
        Self {
            devices,
            repository,
            config,
            events,
            position_tx,
            state: RwLock::new(RunnerState::Idle),
            abort_requested: AtomicBool::new(false),
        }
    }

    /// Subscribe to step progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.events.subscribe()
    }

    /// Intermediate robot positions republished during motion steps.
    pub fn position_updates(&self) -> watch::Receiver<RobotPosition> {
        self.position_tx.subscribe()
    }

    pub async fn state(&self) -> RunnerState {
        *self.state.read().await
    }

    /// Request an abort; the run stops before its next step.
    pub async fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if *state == RunnerState::Running {
            *state = RunnerState::Aborting;
        }
    }

    /// Execute one run to completion.
    ///
    /// Preconditions (algorithm validity, nonzero scale weight) are
    /// checked before anything dispatches; a [`StartError`] therefore
    /// means no record was created. Once steps run, failures persist the
    /// partial record before surfacing as [`RunError`].
    pub async fn run(&self, request: RunRequest) -> Result<CompletedRun, RunFailure> {
        {
            let mut state = self.state.write().await;
            if *state != RunnerState::Idle {
                return Err(StartError::Busy.into());
            }
            *state = RunnerState::Running;
        }
        let result = self.run_inner(&request).await;
        *self.state.write().await = RunnerState::Idle;
        result
    }

    async fn run_inner(&self, request: &RunRequest) -> Result<CompletedRun, RunFailure> {
        self.abort_requested.store(false, Ordering::SeqCst);

        let raw_steps = self
            .repository
            .algorithm_steps(request.algorithm_id)
            .await
            .map_err(|e| StartError::Repository(e.to_string()))?;
        let steps = validate_steps(&raw_steps).map_err(StartError::from)?;

        match self.devices.scale.weight() {
            Some(grams) if grams != 0 => {}
            _ => return Err(StartError::WeightIsZero.into()),
        }

        let plan = request.parameters.plan_run(request.counter);
        info!(
            algorithm_id = request.algorithm_id,
            counter = request.counter,
            steps = steps.len(),
            plus_polarity = plan.plus_polarity,
            "run starting"
        );
        let mut record = TestRecord::new(request.batch_id, request.name.clone(), &plan);

        for step in &steps {
            if self.abort_requested.load(Ordering::SeqCst) {
                warn!(step = step.index, "run aborted by request");
                self.emit(StepEvent::Failed {
                    index: step.index,
                    message: "aborted".into(),
                });
                self.persist_partial(record).await;
                return Err(RunError::Aborted { step: step.index }.into());
            }

            self.emit(StepEvent::Started {
                index: step.index,
                action: step.action.name(),
            });

            if step.action == Action::Finish {
                record.log_step(step.action.name(), &step.parameter);
                self.emit(StepEvent::Completed {
                    index: step.index,
                    action: step.action.name(),
                    result: "finishing".into(),
                });
                break;
            }

            match self.execute_step(step, &plan, &mut record).await {
                Ok(result) => {
                    record.log_step(step.action.name(), &step.parameter);
                    self.emit(StepEvent::Completed {
                        index: step.index,
                        action: step.action.name(),
                        result,
                    });
                }
                Err(run_error) => {
                    error!(
                        step = step.index,
                        action = step.action.name(),
                        parameter = %step.parameter,
                        error = %run_error,
                        "step failed, aborting run"
                    );
                    self.emit(StepEvent::Failed {
                        index: step.index,
                        message: run_error.to_string(),
                    });
                    self.persist_partial(record).await;
                    return Err(run_error.into());
                }
            }
        }

        record.set_voltages(self.devices.pad.voltages());
        let test = record.finish();
        let stored = test.clone();
        let test_id = self
            .repository
            .insert_test(test)
            .await
            .map_err(|e| RunError::Persistence(e.to_string()))?;
        self.emit(StepEvent::Finished { test_id });
        info!(test_id, "run complete");
        Ok(CompletedRun {
            test_id,
            test: stored,
        })
    }

    /// Hand an interrupted run's record to the repository. Best effort:
    /// the original failure stays the primary error.
    async fn persist_partial(&self, mut record: TestRecord) {
        record.set_voltages(self.devices.pad.voltages());
        if let Err(e) = self.repository.insert_test(record.finish()).await {
            warn!(error = %e, "failed to persist partial record");
        }
    }

    async fn execute_step(
        &self,
        step: &ResolvedStep,
        plan: &RunPlan,
        record: &mut TestRecord,
    ) -> Result<String, RunError> {
        let action_name = step.action.name();
        let device_err = |source: anyhow::Error| RunError::Device {
            step: step.index,
            action: action_name,
            source,
        };

        match step.action {
            Action::Setup => {
                self.devices
                    .pad
                    .setup(&[
                        (pad_registers::CHARGE_VOLTAGE, plan.charge_voltage),
                        (pad_registers::LOAD_VOLTAGE, plan.load_voltage),
                        (pad_registers::CHARGE_DURATION, plan.charge_duration_ms / 100),
                        (
                            pad_registers::INTERMEDIATE_DURATION,
                            plan.intermediate_duration_ms / 100,
                        ),
                        (pad_registers::LOAD_DURATION, plan.load_duration_ms / 100),
                        (pad_registers::AUTO_REGULATION, i32::from(plan.auto_regulation)),
                    ])
                    .await
                    .map_err(device_err)?;

                let registers = &self.config.registers;
                let robot = &self.devices.robot;
                if !robot.set_numeric(registers.load_force, plan.load_force).await {
                    warn!("load force write not confirmed");
                }
                if !robot.set_numeric(registers.goto_position, 0).await {
                    warn!("goto-position reset not confirmed");
                }
                Ok("ready".into())
            }

            Action::CheckEnvironment => {
                let celsius = self.devices.environment.temperature();
                let percent = self.devices.environment.humidity();
                record.add_environment(celsius, percent);
                Ok(format!("{:.1}°C {:.0}%", celsius, percent))
            }

            Action::RobotMove | Action::RobotTouchSkip => {
                let target: i32 = step.parameter.trim().parse().map_err(|_| {
                    RunError::BadParameter {
                        step: step.index,
                        action: action_name,
                        parameter: step.parameter.clone(),
                    }
                })?;
                let registers = &self.config.registers;
                let robot = &self.devices.robot;

                robot.set_flag(registers.in_position, false).await;
                if step.action == Action::RobotTouchSkip {
                    // The touch-skip search reads the force limit when it
                    // starts, so refresh it right before the move.
                    robot.set_numeric(registers.load_force, plan.load_force).await;
                }
                robot.set_numeric(registers.goto_position, target).await;
                robot.set_flag(registers.run_command, true).await;

                robot
                    .wait_in_position(
                        registers.in_position,
                        self.config.poll_period,
                        self.config.move_timeout,
                        Some(&self.position_tx),
                    )
                    .await
                    .map_err(device_err)?;
                Ok(format!("at position {}", target))
            }

            Action::TakePhoto => {
                let name = format!("photo_step{:02}", step.index);
                let photo = self
                    .devices
                    .camera
                    .capture(&name)
                    .await
                    .map_err(device_err)?;
                let file_name = photo.file_name.clone();
                record.add_photo(photo, step.parameter.clone());
                Ok(file_name)
            }

            Action::GetWeight => {
                let weight = self
                    .devices
                    .scale
                    .read_weight(self.config.device_timeout)
                    .await
                    .map_err(device_err)?;
                match weight {
                    Some(grams) => {
                        record.add_weight(grams, step.parameter.clone());
                        Ok(format!("{} g", grams))
                    }
                    None => Err(device_err(anyhow!("scale returned no weight"))),
                }
            }

            Action::ReadField => {
                let value = self
                    .devices
                    .field
                    .read_field(self.config.device_timeout)
                    .await
                    .map_err(device_err)?;
                match value {
                    Some(value) => {
                        record.add_field(value);
                        Ok(value.to_string())
                    }
                    None => {
                        warn!("field meter has no reading yet");
                        Ok("unknown".into())
                    }
                }
            }

            Action::ChargeFabric => {
                self.devices
                    .pad
                    .start_cycle(plan.plus_polarity)
                    .await
                    .map_err(device_err)?;
                let millivolts = self
                    .devices
                    .pad
                    .wait_for_phase(PadPhase::Intermediate, self.config.phase_timeout)
                    .await
                    .map_err(device_err)?;
                Ok(format!("charged, {} mV", millivolts))
            }

            Action::LoadFabric => {
                let millivolts = self
                    .devices
                    .pad
                    .wait_for_phase(PadPhase::Loaded, self.config.phase_timeout)
                    .await
                    .map_err(device_err)?;
                Ok(format!("loaded, {} mV", millivolts))
            }

            Action::Wait => {
                let ms: u64 = step.parameter.trim().parse().map_err(|_| {
                    RunError::BadParameter {
                        step: step.index,
                        action: action_name,
                        parameter: step.parameter.clone(),
                    }
                })?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(format!("waited {} ms", ms))
            }

            Action::Observe => {
                tokio::time::sleep(Duration::from_millis(u64::from(plan.observe_duration_ms)))
                    .await;
                Ok(format!("observed {} ms", plan.observe_duration_ms))
            }

            Action::ReleaseFabric => {
                self.devices
                    .pad
                    .release_fabric(self.config.release_settle)
                    .await
                    .map_err(device_err)?;
                Ok("released".into())
            }

            // Finish is intercepted by the run loop before dispatch.
            Action::Finish => Ok("finishing".into()),
        }
    }

    fn emit(&self, event: StepEvent) {
        // No subscribers is fine; progress is advisory.
        let _ = self.events.send(event);
    }
}
