//! Electric-field meter driver.
//!
//! Protocol overview:
//! - Measurement request: `MS`
//! - Reply: `MS,<head>,<value>` where `<value>` is the field reading in
//!   kilovolt scale with a decimal fraction (`MS,00,4.321`)
//!
//! The stored value is the reply ×1000, rounded to an integer, matching
//! how the rest of the rig records field strength. Replies are data lines,
//! so the command queue completes on the first response.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{debug, instrument};

use rig_core::line::{AckPolicy, CommandOutcome, LineEngine};
use rig_core::serial::{split_port, spawn_line_reader, DynSerial, LineHandler};

/// Driver for the electric-field meter.
pub struct FieldMeterDriver {
    engine: LineEngine,
    value_tx: watch::Sender<Option<i32>>,
}

impl FieldMeterDriver {
    /// Open the meter on a real serial port.
    #[cfg(feature = "serial")]
    pub async fn connect(port_path: &str, baud_rate: u32) -> Result<Arc<Self>> {
        let port = rig_core::serial::open_serial_async(port_path, baud_rate, "field meter").await?;
        Ok(Self::attach(Box::new(port)))
    }

    /// Attach to an already-open port and spawn the read loop.
    pub fn attach(port: DynSerial) -> Arc<Self> {
        let (reader, writer) = split_port(port);
        let (value_tx, _) = watch::channel(None);
        let driver = Arc::new(Self {
            engine: LineEngine::new(writer, AckPolicy::FirstResponse, "field meter"),
            value_tx,
        });
        let _ = spawn_line_reader(reader, driver.clone());
        driver
    }

    /// Last received field value, if any reply has parsed yet.
    pub fn value(&self) -> Option<i32> {
        *self.value_tx.borrow()
    }

    /// Request a measurement and wait for the reply. A reply that fails to
    /// parse leaves the last value in place.
    #[instrument(skip(self), err)]
    pub async fn read_field(&self, timeout: Duration) -> Result<Option<i32>> {
        let completion = self.engine.enqueue("MS").await;
        match tokio::time::timeout(timeout, completion.wait())
            .await
            .map_err(|_| anyhow!("field meter read timed out"))?
        {
            CommandOutcome::Acknowledged => Ok(self.value()),
            _ => Err(anyhow!("field meter read cancelled")),
        }
    }

    fn ingest_reply(&self, line: &str) {
        if !line.starts_with("MS") {
            debug!(line, "unexpected field meter line");
            return;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 3 {
            debug!(line, "field meter reply with wrong field count");
            return;
        }
        match parts[2].trim().parse::<f64>() {
            Ok(value) => {
                self.value_tx.send_replace(Some((value * 1000.0).round() as i32));
            }
            Err(_) => debug!(line, "non-numeric field meter value, keeping last"),
        }
    }
}

#[async_trait::async_trait]
impl LineHandler for FieldMeterDriver {
    async fn handle_line(&self, line: &str) {
        self.ingest_reply(line);
        self.engine.handle_line(line).await;
    }

    async fn handle_disconnect(&self) {
        self.engine.clear().await;
    }
}

#[async_trait::async_trait]
impl rig_core::capabilities::FieldSensor for FieldMeterDriver {
    async fn read_field(&self, timeout: Duration) -> Result<Option<i32>> {
        FieldMeterDriver::read_field(self, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn read_field_scales_reply_by_thousand() {
        let (host, device) = tokio::io::duplex(1024);
        let meter = FieldMeterDriver::attach(Box::new(device));
        let (read, mut write) = tokio::io::split(host);
        let mut reader = BufReader::new(read);

        let request = {
            let meter = meter.clone();
            tokio::spawn(async move { meter.read_field(Duration::from_secs(1)).await })
        };

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "MS");
        write.write_all(b"MS,00,4.321\r\n").await.unwrap();

        assert_eq!(request.await.unwrap().unwrap(), Some(4321));
    }

    #[tokio::test]
    async fn unparseable_reply_keeps_last_value() {
        let (host, device) = tokio::io::duplex(1024);
        let meter = FieldMeterDriver::attach(Box::new(device));
        let (read, mut write) = tokio::io::split(host);
        let mut reader = BufReader::new(read);

        let first = {
            let meter = meter.clone();
            tokio::spawn(async move { meter.read_field(Duration::from_secs(1)).await })
        };
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        write.write_all(b"MS,00,2.000\r\n").await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), Some(2000));

        let second = {
            let meter = meter.clone();
            tokio::spawn(async move { meter.read_field(Duration::from_secs(1)).await })
        };
        line.clear();
        reader.read_line(&mut line).await.unwrap();
        write.write_all(b"MS,00,------\r\n").await.unwrap();
        assert_eq!(second.await.unwrap().unwrap(), Some(2000));
    }
}
