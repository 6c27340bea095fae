//! High-voltage pad driver.
//!
//! Protocol overview:
//! - Format: ASCII command/acknowledgment over RS-232, `\r\n` terminated
//! - Commands: `SET <reg> <value>`, `PUL ST+` / `PUL ST-` (start cycle by
//!   polarity), `PUS DRP` (release), `REL SBY` (standby)
//! - Acknowledgment: `OK <command>` echo, `ERR...` on rejection
//! - Telemetry: `A:<phase>,<elapsed>,<voltage>` streamed continuously while
//!   a cycle runs; phase is the controller's 4-phase cycle state, elapsed
//!   counts 0.1 s ticks, voltage is millivolt-scale signed
//!
//! The controller accepts single-byte aliases for the hot-path commands
//! (`R`, `+`, `-`, `D`); acknowledgments still echo the full text.
//!
//! The driver only observes phase transitions, republishing them on a watch
//! channel; the charge/load steps of the orchestrator complete by awaiting
//! that channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, instrument};

use rig_core::data::{pad_registers, PadPhase, VoltageSample};
use rig_core::line::{AckPolicy, CommandOutcome, Completion, LineEngine};
use rig_core::serial::{split_port, spawn_line_reader, DynSerial, LineHandler};

/// Wire aliases understood by the pad controller.
static PAD_ALIASES: &[(&str, &str)] = &[
    ("REL SBY", "R"),
    ("PUL ST+", "+"),
    ("PUL ST-", "-"),
    ("PUS DRP", "D"),
];

/// Display axis bounds never narrow below this window.
const AXIS_FLOOR_MV: i32 = 12_000;

#[derive(Debug, Clone, Copy)]
struct Telemetry {
    elapsed: u32,
    millivolts: i32,
    axis_min: i32,
    axis_max: i32,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            elapsed: 0,
            millivolts: 0,
            axis_min: -AXIS_FLOOR_MV,
            axis_max: AXIS_FLOOR_MV,
        }
    }
}

/// Driver for the high-voltage pad actuator.
pub struct PadDriver {
    engine: LineEngine,
    phase_tx: watch::Sender<PadPhase>,
    telemetry: RwLock<Telemetry>,
    voltages: RwLock<Vec<VoltageSample>>,
    /// Register values already on the controller; `setup` skips re-sending
    /// them.
    previous_params: Mutex<Vec<(u8, i32)>>,
    capture_window: usize,
    command_timeout: Duration,
}

impl PadDriver {
    /// Open the pad on a real serial port and run the connect preamble.
    #[cfg(feature = "serial")]
    pub async fn connect(port_path: &str, baud_rate: u32, capture_window: usize) -> Result<Arc<Self>> {
        let port = rig_core::serial::open_serial_async(port_path, baud_rate, "pad").await?;
        Ok(Self::attach(Box::new(port), capture_window).await)
    }

    /// Attach to an already-open port: spawn the read loop and queue the
    /// connect preamble (console echo off, debug LED off, standby).
    pub async fn attach(port: DynSerial, capture_window: usize) -> Arc<Self> {
        let driver = Self::build(port, capture_window);
        driver
            .engine
            .enqueue(format!("SET {} 1", pad_registers::CONSOLE_QUIET))
            .await;
        driver
            .engine
            .enqueue(format!("SET {} 0", pad_registers::DEBUG_LED))
            .await;
        driver.engine.enqueue("REL SBY").await;
        driver
    }

    fn build(port: DynSerial, capture_window: usize) -> Arc<Self> {
        let (reader, writer) = split_port(port);
        let (phase_tx, _) = watch::channel(PadPhase::Idle);
        let driver = Arc::new(Self {
            engine: LineEngine::new(writer, AckPolicy::OkEcho, "pad").with_aliases(PAD_ALIASES),
            phase_tx,
            telemetry: RwLock::new(Telemetry::default()),
            voltages: RwLock::new(Vec::new()),
            previous_params: Mutex::new(Vec::new()),
            capture_window,
            command_timeout: Duration::from_secs(5),
        });
        let _ = spawn_line_reader(reader, driver.clone());
        driver
    }

    #[cfg(test)]
    pub(crate) fn with_test_port(port: DynSerial, capture_window: usize) -> Arc<Self> {
        Self::build(port, capture_window)
    }

    /// Current cycle phase as last reported by the controller.
    pub fn phase(&self) -> PadPhase {
        *self.phase_tx.borrow()
    }

    /// Last reported elapsed tick and voltage.
    pub fn current_voltage(&self) -> (u32, i32) {
        let t = self.telemetry.read();
        (t.elapsed, t.millivolts)
    }

    /// Display voltage-axis bounds covering 110 % of the observed extremes.
    pub fn axis_bounds(&self) -> (i32, i32) {
        let t = self.telemetry.read();
        (t.axis_min, t.axis_max)
    }

    /// Snapshot of the voltage capture buffer.
    pub fn voltages(&self) -> Vec<VoltageSample> {
        self.voltages.read().clone()
    }

    /// Write changed configuration registers, skipping values the
    /// controller already holds.
    #[instrument(skip(self, parameters), err)]
    pub async fn setup(&self, parameters: &[(u8, i32)]) -> Result<()> {
        let mut completions = Vec::new();
        {
            let previous = self.previous_params.lock();
            for &(register, value) in parameters {
                if previous.contains(&(register, value)) {
                    debug!(register, value, "register unchanged, skipped");
                    continue;
                }
                completions.push((register, value));
            }
        }
        let mut pending = Vec::with_capacity(completions.len());
        for (register, value) in completions {
            pending.push(self.engine.enqueue(format!("SET {} {}", register, value)).await);
        }
        for completion in pending {
            self.run_to_ack(completion).await?;
        }
        *self.previous_params.lock() = parameters.to_vec();
        Ok(())
    }

    /// Reseed the capture buffer and start a charge cycle.
    #[instrument(skip(self), err)]
    pub async fn start_cycle(&self, plus_polarity: bool) -> Result<()> {
        self.reseed_buffer();
        self.phase_tx.send_replace(PadPhase::Idle);
        let command = if plus_polarity { "PUL ST+" } else { "PUL ST-" };
        let completion = self.engine.enqueue(command).await;
        self.run_to_ack(completion).await
    }

    /// Release the charge. `force` discards queued commands first.
    #[instrument(skip(self), err)]
    pub async fn stop_cycle(&self, force: bool) -> Result<()> {
        if force {
            self.engine.clear().await;
        }
        let completion = self.engine.enqueue("PUS DRP").await;
        self.run_to_ack(completion).await
    }

    /// Drop whatever is queued and return the controller to standby.
    #[instrument(skip(self), err)]
    pub async fn standby(&self) -> Result<()> {
        self.engine.clear().await;
        let completion = self.engine.enqueue("REL SBY").await;
        self.run_to_ack(completion).await
    }

    /// Full release sequence: drop the charge, wait out the settle time,
    /// go to standby and prune placeholder samples the cycle never reached.
    #[instrument(skip(self), err)]
    pub async fn release_fabric(&self, settle: Duration) -> Result<()> {
        self.stop_cycle(true).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        tokio::time::sleep(settle).await;
        self.standby().await?;
        self.voltages.write().retain(|s| s.phase != PadPhase::Idle);
        Ok(())
    }

    /// Wait until the controller reports `target` or a later phase,
    /// returning the voltage measured at that point.
    pub async fn wait_for_phase(&self, target: PadPhase, timeout: Duration) -> Result<i32> {
        let mut rx = self.phase_tx.subscribe();
        let wait = async {
            loop {
                if *rx.borrow_and_update() >= target {
                    return Ok(self.telemetry.read().millivolts);
                }
                if rx.changed().await.is_err() {
                    anyhow::bail!("pad driver dropped while waiting for phase {}", target);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| anyhow!("timed out waiting for pad phase {}", target))?
    }

    fn reseed_buffer(&self) {
        let mut buffer = self.voltages.write();
        buffer.clear();
        buffer.push(VoltageSample {
            phase: PadPhase::Charging,
            elapsed: 0,
            millivolts: 0,
        });
        for elapsed in 1..self.capture_window as u32 {
            buffer.push(VoltageSample::placeholder(elapsed));
        }
    }

    async fn run_to_ack(&self, completion: Completion) -> Result<()> {
        let outcome = tokio::time::timeout(self.command_timeout, completion.wait())
            .await
            .map_err(|_| anyhow!("pad command timed out"))?;
        match outcome {
            CommandOutcome::Acknowledged => Ok(()),
            CommandOutcome::Failed => Err(anyhow!("pad rejected command")),
            CommandOutcome::Cancelled => Err(anyhow!("pad command cancelled")),
        }
    }

    /// Parse one `A:` telemetry payload. Malformed lines are dropped.
    fn ingest_telemetry(&self, payload: &str) {
        let parts: Vec<&str> = payload.split(',').collect();
        if parts.len() != 3 {
            debug!(payload, "telemetry with wrong field count dropped");
            return;
        }
        let (phase, elapsed, millivolts) = match (
            parts[0].trim().parse::<u8>(),
            parts[1].trim().parse::<u32>(),
            parts[2].trim().parse::<i32>(),
        ) {
            (Ok(p), Ok(e), Ok(v)) => (PadPhase::from(p), e, v),
            _ => {
                debug!(payload, "non-numeric telemetry dropped");
                return;
            }
        };

        {
            let mut t = self.telemetry.write();
            t.elapsed = elapsed;
            t.millivolts = millivolts;
            let bound = axis_bound(millivolts);
            t.axis_max = t.axis_max.max(bound);
            t.axis_min = t.axis_min.min(bound);
        }

        let sample = VoltageSample {
            phase,
            elapsed,
            millivolts,
        };
        {
            let mut buffer = self.voltages.write();
            match buffer.get_mut(elapsed as usize) {
                Some(slot) => *slot = sample,
                None => buffer.push(sample),
            }
        }

        self.phase_tx.send_replace(phase);
    }
}

/// Smallest 1000-multiple covering 110 % of a voltage, away from zero.
fn axis_bound(millivolts: i32) -> i32 {
    let scaled = 1.1 * f64::from(millivolts) / 1000.0;
    let rounded = if scaled >= 0.0 {
        scaled.ceil()
    } else {
        scaled.floor()
    };
    (rounded as i32) * 1000
}

#[async_trait::async_trait]
impl LineHandler for PadDriver {
    async fn handle_line(&self, line: &str) {
        if let Some(payload) = line.strip_prefix("A:") {
            self.ingest_telemetry(payload);
        } else {
            self.engine.handle_line(line).await;
        }
    }

    async fn handle_disconnect(&self) {
        self.engine.clear().await;
    }
}

#[async_trait::async_trait]
impl rig_core::capabilities::PadControl for PadDriver {
    async fn setup(&self, parameters: &[(u8, i32)]) -> Result<()> {
        PadDriver::setup(self, parameters).await
    }

    async fn start_cycle(&self, plus_polarity: bool) -> Result<()> {
        PadDriver::start_cycle(self, plus_polarity).await
    }

    async fn stop_cycle(&self, force: bool) -> Result<()> {
        PadDriver::stop_cycle(self, force).await
    }

    async fn release_fabric(&self, settle: Duration) -> Result<()> {
        PadDriver::release_fabric(self, settle).await
    }

    fn phase(&self) -> PadPhase {
        PadDriver::phase(self)
    }

    async fn wait_for_phase(&self, target: PadPhase, timeout: Duration) -> Result<i32> {
        PadDriver::wait_for_phase(self, target, timeout).await
    }

    fn voltages(&self) -> Vec<VoltageSample> {
        PadDriver::voltages(self)
    }
}
