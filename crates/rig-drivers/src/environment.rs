//! Temperature/humidity probe driver.
//!
//! Protocol overview:
//! - `SEND AUTO ON` starts the probe's periodic telemetry stream,
//!   `SEND AUTO OFF` stops it; neither is acknowledged
//! - Telemetry: `A:<temperature>,<humidity>,<aux>` at a fixed probe rate
//!
//! Values are last-known-good: a field that fails to parse leaves the
//! previous value untouched, so a glitched line never blanks the display.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::debug;

use rig_core::line::{AckPolicy, LineEngine};
use rig_core::serial::{split_port, spawn_line_reader, DynSerial, LineHandler};

#[derive(Debug, Clone, Copy, Default)]
struct Reading {
    temperature: f32,
    humidity: f32,
}

/// Driver for the ambient temperature/humidity probe.
pub struct EnvironmentDriver {
    engine: LineEngine,
    reading: RwLock<Reading>,
}

impl EnvironmentDriver {
    /// Open the probe on a real serial port and start its stream.
    #[cfg(feature = "serial")]
    pub async fn connect(port_path: &str, baud_rate: u32) -> Result<Arc<Self>> {
        let port = rig_core::serial::open_serial_async(port_path, baud_rate, "environment").await?;
        let driver = Self::attach(Box::new(port));
        driver.start_streaming().await;
        Ok(driver)
    }

    /// Attach to an already-open port and spawn the read loop.
    pub fn attach(port: DynSerial) -> Arc<Self> {
        let (reader, writer) = split_port(port);
        let driver = Arc::new(Self {
            engine: LineEngine::new(writer, AckPolicy::FireAndForget, "environment"),
            reading: RwLock::new(Reading::default()),
        });
        let _ = spawn_line_reader(reader, driver.clone());
        driver
    }

    /// Ask the probe to stream telemetry.
    pub async fn start_streaming(&self) {
        self.engine.enqueue("SEND AUTO ON").await;
    }

    /// Stop the telemetry stream (used before disconnecting).
    pub async fn stop_streaming(&self) {
        self.engine.enqueue("SEND AUTO OFF").await;
    }

    /// Temperature in °C, last known good.
    pub fn temperature(&self) -> f32 {
        self.reading.read().temperature
    }

    /// Relative humidity in %, last known good.
    pub fn humidity(&self) -> f32 {
        self.reading.read().humidity
    }

    fn ingest_telemetry(&self, payload: &str) {
        let parts: Vec<&str> = payload.split(',').collect();
        if parts.len() != 3 {
            debug!(payload, "environment telemetry with wrong field count dropped");
            return;
        }
        let mut reading = self.reading.write();
        if let Ok(temperature) = parts[0].trim().parse::<f32>() {
            reading.temperature = temperature;
        }
        if let Ok(humidity) = parts[1].trim().parse::<f32>() {
            reading.humidity = humidity;
        }
    }
}

#[async_trait::async_trait]
impl LineHandler for EnvironmentDriver {
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

impl rig_core::capabilities::EnvironmentSensor for EnvironmentDriver {
    fn temperature(&self) -> f32 {
        EnvironmentDriver::temperature(self)
    }

    fn humidity(&self) -> f32 {
        EnvironmentDriver::humidity(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn feed(host: &mut tokio::io::DuplexStream, line: &str) {
        host.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn telemetry_updates_both_values() {
        let (mut host, device) = tokio::io::duplex(1024);
        let env = EnvironmentDriver::attach(Box::new(device));

        feed(&mut host, "A:23.5,45.2,0").await;
        assert_eq!(env.temperature(), 23.5);
        assert_eq!(env.humidity(), 45.2);
    }

    #[tokio::test]
    async fn partial_parse_keeps_last_known_good() {
        let (mut host, device) = tokio::io::duplex(1024);
        let env = EnvironmentDriver::attach(Box::new(device));

        feed(&mut host, "A:23.5,45.2,0").await;
        feed(&mut host, "A:xx,46.0,0").await;
        assert_eq!(env.temperature(), 23.5);
        assert_eq!(env.humidity(), 46.0);

        feed(&mut host, "A:24.1,??,0").await;
        assert_eq!(env.temperature(), 24.1);
        assert_eq!(env.humidity(), 46.0);
    }

    #[tokio::test]
    async fn wrong_arity_is_dropped_entirely() {
        let (mut host, device) = tokio::io::duplex(1024);
        let env = EnvironmentDriver::attach(Box::new(device));

        feed(&mut host, "A:23.5,45.2,0").await;
        feed(&mut host, "A:9.9,9.9").await;
        assert_eq!(env.temperature(), 23.5);
        assert_eq!(env.humidity(), 45.2);
    }
}
