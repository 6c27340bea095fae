//! End-to-end runner scenarios over mock devices.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use rig_core::capabilities::{
    EnvironmentSensor, FieldSensor, PadControl, PhotoCapture, PhotoFile, WeightScale,
};
use rig_core::data::{PadPhase, VoltageSample};
use rig_robot::MockRobot;
use rig_sequencer::{
    Devices, RunError, RunFailure, RunRequest, RunnerConfig, StartError, StepEvent, TestParameters,
    TestRunner,
};
use rig_storage::{Algorithm, AlgorithmStep, MemoryRepository, Repository};

// =============================================================================
// Mock devices
// =============================================================================

struct MockPad {
    phase_tx: Arc<watch::Sender<PadPhase>>,
    millivolts: AtomicI32,
    setups: Mutex<Vec<Vec<(u8, i32)>>>,
    snapshot: Vec<VoltageSample>,
}

impl MockPad {
    fn new() -> Arc<Self> {
        let (phase_tx, _) = watch::channel(PadPhase::Idle);
        Arc::new(Self {
            phase_tx: Arc::new(phase_tx),
            millivolts: AtomicI32::new(0),
            setups: Mutex::new(Vec::new()),
            snapshot: vec![
                VoltageSample {
                    phase: PadPhase::Charging,
                    elapsed: 0,
                    millivolts: 0,
                },
                VoltageSample {
                    phase: PadPhase::Loaded,
                    elapsed: 40,
                    millivolts: 7100,
                },
            ],
        })
    }
}

#[async_trait]
impl PadControl for MockPad {
    async fn setup(&self, parameters: &[(u8, i32)]) -> Result<()> {
        self.setups.lock().push(parameters.to_vec());
        Ok(())
    }

    async fn start_cycle(&self, _plus_polarity: bool) -> Result<()> {
        self.phase_tx.send_replace(PadPhase::Idle);
        let phase_tx = self.phase_tx.clone();
        // The controller walks the cycle on its own once started.
        tokio::spawn(async move {
            for phase in [
                PadPhase::Charging,
                PadPhase::Intermediate,
                PadPhase::Loading,
                PadPhase::Loaded,
            ] {
                tokio::time::sleep(Duration::from_millis(5)).await;
                phase_tx.send_replace(phase);
            }
        });
        self.millivolts.store(7100, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_cycle(&self, _force: bool) -> Result<()> {
        self.phase_tx.send_replace(PadPhase::Idle);
        Ok(())
    }

    async fn release_fabric(&self, _settle: Duration) -> Result<()> {
        self.phase_tx.send_replace(PadPhase::Idle);
        Ok(())
    }

    fn phase(&self) -> PadPhase {
        *self.phase_tx.borrow()
    }

    async fn wait_for_phase(&self, target: PadPhase, timeout: Duration) -> Result<i32> {
        let mut rx = self.phase_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() >= target {
                    return Ok(self.millivolts.load(Ordering::SeqCst));
                }
                if rx.changed().await.is_err() {
                    anyhow::bail!("pad dropped");
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| anyhow::anyhow!("phase timeout"))?
    }

    fn voltages(&self) -> Vec<VoltageSample> {
        self.snapshot.clone()
    }
}

struct MockScale {
    weight: Mutex<Option<i32>>,
}

#[async_trait]
impl WeightScale for MockScale {
    async fn read_weight(&self, _timeout: Duration) -> Result<Option<i32>> {
        Ok(*self.weight.lock())
    }

    fn weight(&self) -> Option<i32> {
        *self.weight.lock()
    }

    fn is_stable(&self) -> bool {
        true
    }

    async fn tare(&self) -> Result<()> {
        Ok(())
    }

    async fn zero(&self) -> Result<()> {
        Ok(())
    }
}

struct MockEnvironment;

impl EnvironmentSensor for MockEnvironment {
    fn temperature(&self) -> f32 {
        23.5
    }

    fn humidity(&self) -> f32 {
        45.0
    }
}

struct MockField;

#[async_trait]
impl FieldSensor for MockField {
    async fn read_field(&self, _timeout: Duration) -> Result<Option<i32>> {
        Ok(Some(4321))
    }
}

struct MockCamera;

#[async_trait]
impl PhotoCapture for MockCamera {
    async fn capture(&self, name: &str) -> Result<PhotoFile> {
        Ok(PhotoFile {
            file_name: format!("{}.jpg", name),
            full_path: format!("/photos/{}.jpg", name),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    runner: Arc<TestRunner>,
    repository: Arc<MemoryRepository>,
    pad: Arc<MockPad>,
    robot: Arc<MockRobot>,
    batch_id: i64,
    algorithm_id: i64,
}

async fn harness(scale_weight: Option<i32>, actions: &[(&str, &str)]) -> Harness {
    let repository = Arc::new(MemoryRepository::new());
    let batch_id = repository
        .insert_batch(rig_storage::Batch::default())
        .await
        .unwrap();
    let algorithm_id = repository
        .insert_algorithm(Algorithm {
            id: 0,
            name: "test".into(),
            description: String::new(),
            steps: actions
                .iter()
                .enumerate()
                .map(|(i, (action, parameter))| {
                    AlgorithmStep::new((i * 10) as i32, *action, *parameter)
                })
                .collect(),
        })
        .await
        .unwrap();

    let pad = MockPad::new();
    let robot = Arc::new(MockRobot::new().settle_after(2));
    let devices = Devices {
        pad: pad.clone(),
        scale: Arc::new(MockScale {
            weight: Mutex::new(scale_weight),
        }),
        environment: Arc::new(MockEnvironment),
        field: Arc::new(MockField),
        camera: Arc::new(MockCamera),
        robot: robot.clone(),
    };
    let config = RunnerConfig {
        poll_period: Duration::from_millis(1),
        move_timeout: Duration::from_secs(1),
        device_timeout: Duration::from_secs(1),
        phase_timeout: Duration::from_secs(1),
        release_settle: Duration::from_millis(10),
        ..RunnerConfig::default()
    };
    let runner = Arc::new(TestRunner::new(devices, repository.clone(), config));
    Harness {
        runner,
        repository,
        pad,
        robot,
        batch_id,
        algorithm_id,
    }
}

fn request(h: &Harness) -> RunRequest {
    RunRequest {
        algorithm_id: h.algorithm_id,
        batch_id: h.batch_id,
        name: "run".into(),
        parameters: TestParameters::default(),
        counter: 1,
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<StepEvent>) -> Vec<StepEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn full_run_records_one_weight_entry() {
    let h = harness(
        Some(5100),
        &[
            ("Start", ""),
            ("GetWeight", "Full"),
            ("RobotMove", "1"),
            ("Finish", ""),
        ],
    )
    .await;
    let mut events = h.runner.subscribe();

    let completed = h.runner.run(request(&h)).await.unwrap();

    assert_eq!(completed.test.weights.len(), 1);
    assert_eq!(completed.test.weights[0].grams, 5100);
    assert_eq!(completed.test.weights[0].description, "Full");

    // All four steps completed, in order, exactly once each.
    let drained = drain(&mut events);
    let completions: Vec<usize> = drained
        .iter()
        .filter_map(|e| match e {
            StepEvent::Completed { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(completions, vec![0, 1, 2, 3]);
    assert!(matches!(drained.last(), Some(StepEvent::Finished { .. })));

    // The audit trail names every executed step.
    let actions: Vec<&str> = completed.test.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["Setup", "GetWeight", "RobotMove", "Finish"]);

    // And the record was persisted.
    let stored = h.repository.tests_for_batch(h.batch_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].weights[0].grams, 5100);
}

#[tokio::test]
async fn zero_weight_aborts_before_any_dispatch() {
    let h = harness(
        Some(0),
        &[("Start", ""), ("GetWeight", "Full"), ("Finish", "")],
    )
    .await;
    let mut events = h.runner.subscribe();

    let failure = h.runner.run(request(&h)).await.unwrap_err();
    assert!(matches!(
        failure,
        RunFailure::Start(StartError::WeightIsZero)
    ));

    // No record was created and no step dispatched.
    assert!(h.repository.tests_for_batch(h.batch_id).await.unwrap().is_empty());
    assert!(drain(&mut events).is_empty());
    assert!(h.robot.writes().is_empty());
}

#[tokio::test]
async fn unknown_weight_is_also_a_zero_weight_error() {
    let h = harness(None, &[("Start", ""), ("Finish", "")]).await;
    let failure = h.runner.run(request(&h)).await.unwrap_err();
    assert!(matches!(
        failure,
        RunFailure::Start(StartError::WeightIsZero)
    ));
}

#[tokio::test(start_paused = true)]
async fn wait_step_advances_exactly_once_after_duration() {
    let h = harness(Some(5100), &[("Wait", "2000"), ("Finish", "")]).await;
    let mut events = h.runner.subscribe();

    let started = tokio::time::Instant::now();
    h.runner.run(request(&h)).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2000));

    let wait_completions = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, StepEvent::Completed { index: 0, .. }))
        .count();
    assert_eq!(wait_completions, 1);
}

#[tokio::test]
async fn unknown_action_is_rejected_before_running() {
    let h = harness(Some(5100), &[("Start", ""), ("Teleport", "9"), ("Finish", "")]).await;
    let mut events = h.runner.subscribe();

    let failure = h.runner.run(request(&h)).await.unwrap_err();
    match failure {
        RunFailure::Start(StartError::InvalidAlgorithm(e)) => {
            assert_eq!(e.to_string(), "step 1: no handler registered for action 'Teleport'");
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(drain(&mut events).is_empty());
    assert!(h.repository.tests_for_batch(h.batch_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_parameter_aborts_and_persists_partial_record() {
    let h = harness(
        Some(5100),
        &[("Start", ""), ("RobotMove", "not-a-number"), ("Finish", "")],
    )
    .await;

    let failure = h.runner.run(request(&h)).await.unwrap_err();
    match failure {
        RunFailure::Run(RunError::BadParameter {
            step,
            action,
            parameter,
        }) => {
            assert_eq!(step, 1);
            assert_eq!(action, "RobotMove");
            assert_eq!(parameter, "not-a-number");
        }
        other => panic!("unexpected failure: {:?}", other),
    }

    // The interrupted record still reached the repository, with the audit
    // trail of what did execute.
    let stored = h.repository.tests_for_batch(h.batch_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    let actions: Vec<&str> = stored[0].steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, vec!["Setup"]);
}

#[tokio::test]
async fn charge_and_load_complete_on_pad_phases() {
    let h = harness(
        Some(5100),
        &[
            ("Start", ""),
            ("ChargeFabric", ""),
            ("LoadFabric", ""),
            ("ReleaseFabric", ""),
            ("Finish", ""),
        ],
    )
    .await;

    let completed = h.runner.run(request(&h)).await.unwrap();

    // The voltage series snapshot landed in the record.
    assert_eq!(completed.test.voltages, h.pad.snapshot);
    // Setup pushed the planned values at the pad.
    let setups = h.pad.setups.lock();
    assert_eq!(setups.len(), 1);
    assert!(setups[0].iter().any(|&(reg, v)| reg == 1 && v == 7000));
}

#[tokio::test]
async fn robot_move_writes_registers_and_polls_to_position() {
    let h = harness(
        Some(5100),
        &[("RobotMove", "3"), ("Finish", "")],
    )
    .await;

    h.runner.run(request(&h)).await.unwrap();

    use rig_robot::mock::RegisterWrite;
    let writes = h.robot.writes();
    let registers = RunnerConfig::default().registers;
    assert_eq!(
        writes,
        vec![
            RegisterWrite::Flag(registers.in_position, false),
            RegisterWrite::Numeric(registers.goto_position, 3),
            RegisterWrite::Flag(registers.run_command, true),
        ]
    );
}

#[tokio::test]
async fn measurement_steps_each_append_one_entry() {
    let h = harness(
        Some(5100),
        &[
            ("Start", ""),
            ("CheckEnvironment", ""),
            ("TakePhoto", "Ready to load"),
            ("ReadField", ""),
            ("Finish", ""),
        ],
    )
    .await;

    let completed = h.runner.run(request(&h)).await.unwrap();

    assert_eq!(completed.test.temperatures.len(), 1);
    assert_eq!(completed.test.temperatures[0].celsius, 23.5);
    assert_eq!(completed.test.humidities.len(), 1);
    assert_eq!(completed.test.humidities[0].percent, 45.0);
    assert_eq!(completed.test.electro_statics.len(), 1);
    assert_eq!(completed.test.electro_statics[0].value, 4321);
    assert_eq!(completed.test.photos.len(), 1);
    assert_eq!(completed.test.photos[0].description, "Ready to load");
    assert_eq!(completed.test.photos[0].file_name, "photo_step02.jpg");
}

#[tokio::test]
async fn abort_stops_the_run_and_persists_partial_record() {
    let h = harness(
        Some(5100),
        &[
            ("Start", ""),
            ("Wait", "200"),
            ("GetWeight", "late"),
            ("Finish", ""),
        ],
    )
    .await;

    let req = request(&h);
    let runner = h.runner.clone();
    let run = tokio::spawn(async move { runner.run(req).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.runner.abort().await;

    let failure = run.await.unwrap().unwrap_err();
    assert!(matches!(failure, RunFailure::Run(RunError::Aborted { .. })));

    // The partial record reached the repository; the late weight never ran.
    let stored = h.repository.tests_for_batch(h.batch_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].weights.is_empty());
}
