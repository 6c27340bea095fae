//! Error types for the rig.
//!
//! Expected device failures (malformed lines, disconnects, timeouts) are
//! downgraded to "unknown" state inside the drivers and never cross the
//! protocol boundary as errors. What does cross is collected here:
//! transport-level faults the caller's polling logic retries, and
//! precondition/configuration faults that abort a run.

use thiserror::Error;

/// Classification of a device-level fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Connection,
    Communication,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceErrorKind::Connection => "connection",
            DeviceErrorKind::Communication => "communication",
            DeviceErrorKind::Timeout => "timeout",
            DeviceErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// A fault raised by a device driver.
#[derive(Error, Debug, Clone)]
#[error("Device '{device}' {kind} error: {message}")]
pub struct DeviceError {
    pub device: String,
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(
        device: impl Into<String>,
        kind: DeviceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(device, DeviceErrorKind::Timeout, message)
    }

    pub fn cancelled(device: impl Into<String>) -> Self {
        Self::new(device, DeviceErrorKind::Cancelled, "command cancelled")
    }
}

/// Primary error type for the rig control core.
#[derive(Error, Debug)]
pub enum RigError {
    /// Transport or protocol fault raised by a device driver.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Semantic configuration error caught during validation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;
