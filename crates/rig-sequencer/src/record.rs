//! Test-record builder.
//!
//! Handlers append exactly one measurement (or photo, or the voltage
//! snapshot) before their step completes. The record is owned exclusively
//! by the runner while the run is live; [`TestRecord::finish`] consumes
//! the builder, so a frozen record cannot be mutated afterwards.

use chrono::Utc;

use rig_core::capabilities::PhotoFile;
use rig_core::data::VoltageSample;
use rig_storage::{ElectroStatic, Humidity, Photo, Temperature, Test, TestStep, Weight};

use crate::params::RunPlan;

/// Accumulates one run's measurements and audit trail.
#[derive(Debug, Clone)]
pub struct TestRecord {
    test: Test,
}

impl TestRecord {
    /// Open a record for a new run, stamping the run's concrete
    /// parameters.
    pub fn new(batch_id: i64, name: impl Into<String>, plan: &RunPlan) -> Self {
        Self {
            test: Test {
                id: 0,
                batch_id,
                name: name.into(),
                date: Utc::now(),
                load_force: plan.load_force,
                hv_charging: plan.charge_voltage,
                hv_loading: plan.load_voltage,
                duration_charging: plan.charge_duration_ms,
                duration_intermediate: plan.intermediate_duration_ms,
                duration_loading: plan.load_duration_ms,
                duration_observing: plan.observe_duration_ms as i32,
                plus_polarity: plan.plus_polarity,
                auto_regulation: plan.auto_regulation,
                temperatures: Vec::new(),
                humidities: Vec::new(),
                electro_statics: Vec::new(),
                weights: Vec::new(),
                photos: Vec::new(),
                voltages: Vec::new(),
                steps: Vec::new(),
            },
        }
    }

    pub fn add_weight(&mut self, grams: i32, description: impl Into<String>) {
        self.test.weights.push(Weight {
            grams,
            description: description.into(),
        });
    }

    pub fn add_photo(&mut self, photo: PhotoFile, description: impl Into<String>) {
        self.test.photos.push(Photo {
            file_name: photo.file_name,
            full_path: photo.full_path,
            description: description.into(),
        });
    }

    pub fn add_environment(&mut self, celsius: f32, percent: f32) {
        self.test.temperatures.push(Temperature { celsius });
        self.test.humidities.push(Humidity { percent });
    }

    pub fn add_field(&mut self, value: i32) {
        self.test.electro_statics.push(ElectroStatic { value });
    }

    /// Replace the voltage series with the pad's capture snapshot.
    pub fn set_voltages(&mut self, samples: Vec<VoltageSample>) {
        self.test.voltages = samples;
    }

    /// Append an audit entry for an executed step.
    pub fn log_step(&mut self, action: &str, parameter: &str) {
        self.test.steps.push(TestStep {
            action: action.to_string(),
            parameter: parameter.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Read-only view for progress consumers.
    pub fn as_test(&self) -> &Test {
        &self.test
    }

    /// Freeze the record. Consuming the builder is what makes the record
    /// immutable from here on.
    pub fn finish(self) -> Test {
        self.test
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TestParameters;

    #[test]
    fn record_carries_plan_and_measurements() {
        let plan = TestParameters::default().plan_run(1);
        let mut record = TestRecord::new(7, "run 1", &plan);

        record.add_weight(5100, "Full");
        record.add_environment(23.5, 45.0);
        record.add_field(4321);
        record.log_step("GetWeight", "Full");

        let test = record.finish();
        assert_eq!(test.batch_id, 7);
        assert_eq!(test.hv_charging, plan.charge_voltage);
        assert_eq!(test.weights.len(), 1);
        assert_eq!(test.weights[0].grams, 5100);
        assert_eq!(test.temperatures.len(), 1);
        assert_eq!(test.electro_statics[0].value, 4321);
        assert_eq!(test.steps.len(), 1);
        assert_eq!(test.steps[0].action, "GetWeight");
    }
}
