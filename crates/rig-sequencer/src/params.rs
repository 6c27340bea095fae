//! Swept test parameters and the per-run planner.
//!
//! A batch configures ranges; the planner turns the 1-based run counter
//! into the concrete values of one run by linear interpolation across the
//! batch (`rig_core::interpolate`) plus the polarity alternation schedule.

use serde::{Deserialize, Serialize};

use rig_core::interpolate::{plus_polarity, sweep_value};

/// A value swept linearly across the runs of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweptValue {
    pub lo: i32,
    pub hi: i32,
    /// Sweep direction: start at `hi` when true.
    pub max_to_min: bool,
}

impl SweptValue {
    pub const fn fixed(value: i32) -> Self {
        Self {
            lo: value,
            hi: value,
            max_to_min: false,
        }
    }

    /// Value for run `counter` of `total`.
    pub fn at(&self, counter: u32, total: u32) -> i32 {
        sweep_value(counter, total, self.lo, self.hi, self.max_to_min)
    }
}

/// User-configured ranges for a batch of runs. Read-only input to each
/// run; the planner derives the concrete values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParameters {
    /// Charging-phase high voltage \[V\].
    pub charge_voltage: SweptValue,
    /// Loading-phase high voltage \[V\].
    pub load_voltage: SweptValue,
    /// Phase durations \[ms\].
    pub charge_duration: SweptValue,
    pub intermediate_duration: SweptValue,
    pub load_duration: SweptValue,
    /// Observation hold after loading \[ms\].
    pub observe_duration: u32,
    /// Robot load force for the touch-skip search \[N\].
    pub load_force: i32,
    pub auto_regulation: bool,
    /// Polarity of the first run.
    pub start_plus_polarity: bool,
    /// Runs between polarity flips.
    pub change_polarity_step: u32,
    /// Number of runs in the batch.
    pub total_runs: u32,
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            charge_voltage: SweptValue {
                lo: 4000,
                hi: 7000,
                max_to_min: true,
            },
            load_voltage: SweptValue {
                lo: 6000,
                hi: 8000,
                max_to_min: false,
            },
            charge_duration: SweptValue {
                lo: 700,
                hi: 3000,
                max_to_min: false,
            },
            intermediate_duration: SweptValue::fixed(400),
            load_duration: SweptValue {
                lo: 1000,
                hi: 2000,
                max_to_min: true,
            },
            observe_duration: 3000,
            load_force: 5,
            auto_regulation: false,
            start_plus_polarity: true,
            change_polarity_step: 1,
            total_runs: 10,
        }
    }
}

/// Concrete values of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub charge_voltage: i32,
    pub load_voltage: i32,
    pub charge_duration_ms: i32,
    pub intermediate_duration_ms: i32,
    pub load_duration_ms: i32,
    pub observe_duration_ms: u32,
    pub load_force: i32,
    pub auto_regulation: bool,
    pub plus_polarity: bool,
}

impl TestParameters {
    /// Plan run `counter` (1-based) of the batch.
    pub fn plan_run(&self, counter: u32) -> RunPlan {
        let total = self.total_runs;
        RunPlan {
            charge_voltage: self.charge_voltage.at(counter, total),
            load_voltage: self.load_voltage.at(counter, total),
            charge_duration_ms: self.charge_duration.at(counter, total),
            intermediate_duration_ms: self.intermediate_duration.at(counter, total),
            load_duration_ms: self.load_duration.at(counter, total),
            observe_duration_ms: self.observe_duration,
            load_force: self.load_force,
            auto_regulation: self.auto_regulation,
            plus_polarity: plus_polarity(
                counter,
                self.change_polarity_step,
                self.start_plus_polarity,
            ),
        }
    }
}
