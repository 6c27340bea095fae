//! Shared data types for the pad's high-voltage cycle.

use serde::{Deserialize, Serialize};

/// Stage of the pad's high-voltage cycle.
///
/// The controller, not the driver, decides transitions; the driver only
/// observes the phase field of the telemetry stream. Within one cycle the
/// phase advances monotonically and resets to `Idle` when a new cycle
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PadPhase {
    Idle = 0,
    Charging = 1,
    Intermediate = 2,
    Loading = 3,
    Loaded = 4,
}

impl From<u8> for PadPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => PadPhase::Charging,
            2 => PadPhase::Intermediate,
            3 => PadPhase::Loading,
            4 => PadPhase::Loaded,
            _ => PadPhase::Idle,
        }
    }
}

impl std::fmt::Display for PadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PadPhase::Idle => "idle",
            PadPhase::Charging => "charging",
            PadPhase::Intermediate => "intermediate",
            PadPhase::Loading => "loading",
            PadPhase::Loaded => "loaded",
        };
        write!(f, "{}", label)
    }
}

/// One point of the pad's high-voltage telemetry.
///
/// `elapsed` counts 0.1 s ticks from cycle start and doubles as the sample's
/// slot in the capture buffer, so a late duplicate tick overwrites rather
/// than appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoltageSample {
    pub phase: PadPhase,
    /// Elapsed cycle time in 0.1 s ticks.
    pub elapsed: u32,
    /// Measured high voltage, millivolt scale, signed.
    pub millivolts: i32,
}

impl VoltageSample {
    /// Buffer placeholder for a tick no telemetry has reached yet.
    pub fn placeholder(elapsed: u32) -> Self {
        Self {
            phase: PadPhase::Idle,
            elapsed,
            millivolts: 0,
        }
    }
}

/// Pad controller `SET` register assignments.
///
/// These are properties of the pad firmware, unlike the robot registers
/// which vary per deployment and live in the configuration.
pub mod pad_registers {
    /// Charging-phase high voltage \[V\].
    pub const CHARGE_VOLTAGE: u8 = 1;
    /// Loading-phase high voltage \[V\].
    pub const LOAD_VOLTAGE: u8 = 2;
    /// Charging-phase duration \[0.1 s\].
    pub const CHARGE_DURATION: u8 = 4;
    /// Intermediate-phase duration \[0.1 s\].
    pub const INTERMEDIATE_DURATION: u8 = 5;
    /// Loading-phase duration \[0.1 s\].
    pub const LOAD_DURATION: u8 = 6;
    /// High-voltage auto-regulation on/off.
    pub const AUTO_REGULATION: u8 = 8;
    /// Front-panel debug LED on/off.
    pub const DEBUG_LED: u8 = 12;
    /// Console echo suppression (1 = quiet).
    pub const CONSOLE_QUIET: u8 = 13;
}
