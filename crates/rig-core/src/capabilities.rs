//! Device-facing capability traits.
//!
//! The orchestrator sequences heterogeneous devices through small,
//! focused traits rather than concrete driver types:
//!
//! - the pad implements [`PadControl`]
//! - the scale implements [`WeightScale`]
//! - the temperature/humidity probe implements [`EnvironmentSensor`]
//! - the electric-field meter implements [`FieldSensor`]
//! - the camera collaborator implements [`PhotoCapture`]
//!
//! Each trait is async (`#[async_trait]`), thread-safe (`Send + Sync`) and
//! uses `anyhow::Result` at the boundary. Tests mock individual traits
//! without touching serial plumbing.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::data::{PadPhase, VoltageSample};

/// High-voltage pad actuator.
#[async_trait]
pub trait PadControl: Send + Sync {
    /// Write changed configuration registers (`SET <n> <v>`), skipping
    /// values already on the controller.
    async fn setup(&self, parameters: &[(u8, i32)]) -> Result<()>;

    /// Reset the voltage capture buffer and start a charge cycle with the
    /// given polarity.
    async fn start_cycle(&self, plus_polarity: bool) -> Result<()>;

    /// Release the charge. `force` discards any queued commands first.
    async fn stop_cycle(&self, force: bool) -> Result<()>;

    /// Stop the cycle, wait out the release settle time, return to standby
    /// and prune untouched placeholder samples.
    async fn release_fabric(&self, settle: Duration) -> Result<()>;

    /// Current cycle phase as last reported by the controller.
    fn phase(&self) -> PadPhase;

    /// Wait until the controller reports `target` (or a later phase),
    /// returning the voltage measured at that point.
    async fn wait_for_phase(&self, target: PadPhase, timeout: Duration) -> Result<i32>;

    /// Point-in-time snapshot of the voltage capture buffer.
    fn voltages(&self) -> Vec<VoltageSample>;
}

/// Weighing scale.
#[async_trait]
pub trait WeightScale: Send + Sync {
    /// Request a fresh reading and wait for it. Returns `None` when the
    /// scale answered with something unparseable.
    async fn read_weight(&self, timeout: Duration) -> Result<Option<i32>>;

    /// Last received weight in grams, if any.
    fn weight(&self) -> Option<i32>;

    /// Whether the last reading carried the stable marker.
    fn is_stable(&self) -> bool;

    async fn tare(&self) -> Result<()>;

    async fn zero(&self) -> Result<()>;
}

/// Ambient temperature/humidity probe. Values are last-known-good: a field
/// that fails to parse leaves the previous value in place.
pub trait EnvironmentSensor: Send + Sync {
    /// Temperature in °C.
    fn temperature(&self) -> f32;

    /// Relative humidity in %.
    fn humidity(&self) -> f32;
}

/// Electric-field meter.
#[async_trait]
pub trait FieldSensor: Send + Sync {
    /// Request a measurement and wait for it. Returns the last-known value
    /// when the reply fails to parse.
    async fn read_field(&self, timeout: Duration) -> Result<Option<i32>>;
}

/// A captured photo, named by the collaborator that stored it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoFile {
    pub file_name: String,
    pub full_path: String,
}

/// Camera collaborator. Capture mechanics are outside the control core.
#[async_trait]
pub trait PhotoCapture: Send + Sync {
    async fn capture(&self, name: &str) -> Result<PhotoFile>;
}
