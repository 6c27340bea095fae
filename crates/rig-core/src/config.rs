//! Deployment configuration, loaded with Figment.
//!
//! Configuration comes from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `RIG_` (overrides), with `__`
//!    separating nesting levels (`RIG_ROBOT__IP=10.0.0.9`)
//!
//! Robot register index assignments are deployment-specific wiring of the
//! robot program and must come from here, never from code.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RigError, RigResult};

/// Top-level rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    pub pad: SerialPortConfig,
    pub scale: SerialPortConfig,
    pub environment: SerialPortConfig,
    pub field_meter: SerialPortConfig,
    pub robot: RobotConfig,
    /// Voltage capture window in 0.1 s ticks.
    #[serde(default = "default_capture_window")]
    pub capture_window: usize,
}

fn default_capture_window() -> usize {
    250
}

/// One serial device attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortConfig {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub path: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    9600
}

/// Robot controller attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Controller IP address or host name.
    pub ip: String,
    #[serde(default)]
    pub registers: RobotRegisters,
    /// Reachability probe attempts before declaring the robot offline.
    #[serde(default = "default_ping_attempts")]
    pub ping_attempts: u32,
    /// Per-attempt probe timeout in milliseconds.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// In-position poll period in milliseconds.
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,
}

fn default_ping_attempts() -> u32 {
    20
}

fn default_ping_timeout_ms() -> u64 {
    250
}

fn default_poll_period_ms() -> u64 {
    100
}

/// Register index assignments inside the robot program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotRegisters {
    /// Numeric register selecting the motion target.
    pub goto_position: u16,
    /// Numeric register carrying the load force.
    pub load_force: u16,
    /// Flag register the robot raises once in position.
    pub in_position: u16,
    /// Flag register that triggers execution of the pending command.
    pub run_command: u16,
}

impl Default for RobotRegisters {
    fn default() -> Self {
        Self {
            goto_position: 1,
            load_force: 2,
            in_position: 1,
            run_command: 3,
        }
    }
}

impl RigConfig {
    /// Load configuration from `rig.toml` in the working directory.
    pub fn load() -> RigResult<Self> {
        Self::load_from("rig.toml")
    }

    /// Load configuration from a specific TOML file plus `RIG_` environment
    /// overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RigResult<Self> {
        let config: RigConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RIG_").split("__"))
            .extract()
            .map_err(|e| RigError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation beyond what deserialization catches.
    pub fn validate(&self) -> RigResult<()> {
        if self.robot.ip.trim().is_empty() {
            return Err(RigError::Configuration("robot.ip must not be empty".into()));
        }
        if self.capture_window == 0 {
            return Err(RigError::Configuration(
                "capture_window must be at least 1 tick".into(),
            ));
        }
        for (name, port) in [
            ("pad", &self.pad),
            ("scale", &self.scale),
            ("environment", &self.environment),
            ("field_meter", &self.field_meter),
        ] {
            if port.path.trim().is_empty() {
                return Err(RigError::Configuration(format!(
                    "{}.path must not be empty",
                    name
                )));
            }
        }
        Ok(())
    }
}
