//! Entity shapes persisted by the storage collaborator.
//!
//! A batch groups the tests run on one fabric sample; a test aggregates
//! every measurement taken during one run plus the audit trail of executed
//! steps. Algorithms are the design-time counterpart: an ordered list of
//! named actions the orchestrator walks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rig_core::data::VoltageSample;

/// A batch of tests on one fabric sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub fabric_type: String,
    pub fabric_composition: String,
    pub fabric_color: String,
    /// Fabric weight in g/m².
    pub fabric_gsm: i32,
}

/// One captured photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub file_name: String,
    pub full_path: String,
    pub description: String,
}

/// One scale reading in grams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Weight {
    pub grams: i32,
    pub description: String,
}

/// One ambient temperature reading in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    pub celsius: f32,
}

/// One relative humidity reading in %.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Humidity {
    pub percent: f32,
}

/// One electric-field reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectroStatic {
    pub value: i32,
}

/// Audit entry for one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    pub parameter: String,
    pub timestamp: DateTime<Utc>,
}

/// The aggregate of all measurements and step audit entries for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: i64,
    pub batch_id: i64,
    pub name: String,
    pub date: DateTime<Utc>,

    // Concrete parameters of this run.
    pub load_force: i32,
    pub hv_charging: i32,
    pub hv_loading: i32,
    /// Phase durations in milliseconds.
    pub duration_charging: i32,
    pub duration_intermediate: i32,
    pub duration_loading: i32,
    pub duration_observing: i32,
    pub plus_polarity: bool,
    pub auto_regulation: bool,

    // Measurements collected while the run progressed.
    pub temperatures: Vec<Temperature>,
    pub humidities: Vec<Humidity>,
    pub electro_statics: Vec<ElectroStatic>,
    pub weights: Vec<Weight>,
    pub photos: Vec<Photo>,
    pub voltages: Vec<VoltageSample>,
    pub steps: Vec<TestStep>,
}

impl Test {
    /// End of the charging phase in 0.1 s ticks.
    pub fn end_of_charging(&self) -> i32 {
        self.duration_charging / 100
    }

    /// End of the intermediate phase in 0.1 s ticks.
    pub fn end_of_intermediate(&self) -> i32 {
        self.end_of_charging() + self.duration_intermediate / 100
    }

    /// End of the loading phase in 0.1 s ticks.
    pub fn end_of_loading(&self) -> i32 {
        self.end_of_intermediate() + self.duration_loading / 100
    }
}

/// A design-time test algorithm: ordered steps, immutable at run time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub steps: Vec<AlgorithmStep>,
}

/// One configured unit of work in an algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmStep {
    /// Position of the step inside its algorithm.
    pub order: i32,
    /// Name of the action the orchestrator dispatches.
    pub action: String,
    /// Free-form action argument (duration, position number, label...).
    pub parameter: String,
    pub front_label: String,
    pub back_label: String,
}

impl AlgorithmStep {
    pub fn new(order: i32, action: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            order,
            action: action.into(),
            parameter: parameter.into(),
            front_label: String::new(),
            back_label: String::new(),
        }
    }
}
