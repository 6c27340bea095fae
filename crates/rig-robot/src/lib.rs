//! FANUC-style robot controller client.
//!
//! The robot is driven indirectly: the controller runs a fixed motion
//! program that watches a handful of registers, and this crate reads and
//! writes those registers over the controller's HTTP interfaces (COMET RPC
//! and KCL/karel endpoints). Which register number means what is deployment
//! wiring and comes from `rig_core::config::RobotRegisters`.
//!
//! - [`client::RobotClient`]: the HTTP implementation
//! - [`mock::MockRobot`]: a scripted in-memory twin for tests
//! - [`position::RobotPosition`]: the six-axis position report

pub mod client;
pub mod mock;
pub mod position;

pub use client::{NumericRegister, ProbeConfig, RobotApi, RobotClient};
pub use mock::MockRobot;
pub use position::RobotPosition;
