//! Serial device drivers for the electrostatic-fabric test rig.
//!
//! Every driver here is a specialization of the shared line protocol engine
//! in `rig-core::line`: it owns the device's serial port, runs the read
//! loop, parses its measurement lines in place and feeds everything else to
//! the engine's queue/ack machinery.
//!
//! - [`pad`]: the high-voltage pad actuator (4-phase charge cycle)
//! - [`scale`]: the weighing scale
//! - [`environment`]: the temperature/humidity probe
//! - [`fieldmeter`]: the electric-field meter

pub mod environment;
pub mod fieldmeter;
pub mod pad;
pub mod scale;

pub use environment::EnvironmentDriver;
pub use fieldmeter::FieldMeterDriver;
pub use pad::PadDriver;
pub use scale::ScaleDriver;
