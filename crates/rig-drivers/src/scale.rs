//! Weighing scale driver.
//!
//! Protocol overview:
//! - Read request: `Sx3`; tare: `ST`; zero: `SZ`
//! - Reply: stability marker (`S` stable / `U` unstable) followed by a
//!   signed integer weight in grams, possibly space-padded (`S   +5100`)
//! - Tare/zero echo `ST`/`UT` style confirmations
//!
//! The scale answers with data lines rather than `OK` echoes, so the
//! command queue completes on the first response. An atomic in-flight
//! guard keeps a second `read_weight` from putting a redundant request on
//! the wire while one is already outstanding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use regex::Regex;
use tokio::sync::watch;
use tracing::{debug, instrument};

use rig_core::line::{AckPolicy, CommandOutcome, LineEngine};
use rig_core::serial::{split_port, spawn_line_reader, DynSerial, LineHandler};

fn weight_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\s*\d+").unwrap_or_else(|_| unreachable!()))
}

/// Driver for the weighing scale.
pub struct ScaleDriver {
    engine: LineEngine,
    weight_tx: watch::Sender<Option<i32>>,
    stable: AtomicBool,
    reading: AtomicBool,
}

impl ScaleDriver {
    /// Open the scale on a real serial port.
    #[cfg(feature = "serial")]
    pub async fn connect(port_path: &str, baud_rate: u32) -> Result<Arc<Self>> {
        let port = rig_core::serial::open_serial_async(port_path, baud_rate, "scale").await?;
        Ok(Self::attach(Box::new(port)))
    }

    /// Attach to an already-open port and spawn the read loop.
    pub fn attach(port: DynSerial) -> Arc<Self> {
        let (reader, writer) = split_port(port);
        let (weight_tx, _) = watch::channel(None);
        let driver = Arc::new(Self {
            engine: LineEngine::new(writer, AckPolicy::FirstResponse, "scale"),
            weight_tx,
            stable: AtomicBool::new(false),
            reading: AtomicBool::new(false),
        });
        let _ = spawn_line_reader(reader, driver.clone());
        driver
    }

    /// Last received weight in grams, if the last reply parsed.
    pub fn weight(&self) -> Option<i32> {
        *self.weight_tx.borrow()
    }

    /// Whether the last reading carried the stable marker.
    pub fn is_stable(&self) -> bool {
        self.stable.load(Ordering::SeqCst)
    }

    /// Request a fresh reading and wait for the reply.
    ///
    /// When a read is already outstanding no second request hits the wire;
    /// the call waits for the in-flight reply instead.
    #[instrument(skip(self), err)]
    pub async fn read_weight(&self, timeout: Duration) -> Result<Option<i32>> {
        if self.reading.swap(true, Ordering::SeqCst) {
            debug!("read already in flight, waiting for its reply");
            let mut rx = self.weight_tx.subscribe();
            tokio::time::timeout(timeout, rx.changed())
                .await
                .map_err(|_| anyhow!("scale read timed out"))?
                .map_err(|_| anyhow!("scale driver dropped"))?;
            return Ok(self.weight());
        }

        let completion = self.engine.enqueue("Sx3").await;
        let outcome = tokio::time::timeout(timeout, completion.wait()).await;
        match outcome {
            Ok(CommandOutcome::Acknowledged) => Ok(self.weight()),
            Ok(_) => {
                self.reading.store(false, Ordering::SeqCst);
                Err(anyhow!("scale read cancelled"))
            }
            Err(_) => {
                self.reading.store(false, Ordering::SeqCst);
                Err(anyhow!("scale read timed out"))
            }
        }
    }

    /// Tare the scale.
    #[instrument(skip(self), err)]
    pub async fn tare(&self) -> Result<()> {
        self.run_command("ST").await
    }

    /// Zero the scale.
    #[instrument(skip(self), err)]
    pub async fn zero(&self) -> Result<()> {
        self.run_command("SZ").await
    }

    async fn run_command(&self, command: &str) -> Result<()> {
        let completion = self.engine.enqueue(command).await;
        match tokio::time::timeout(Duration::from_secs(5), completion.wait())
            .await
            .map_err(|_| anyhow!("scale command timed out"))?
        {
            CommandOutcome::Acknowledged => Ok(()),
            _ => Err(anyhow!("scale command cancelled")),
        }
    }

    fn ingest_reply(&self, line: &str) {
        match weight_regex().find(line) {
            Some(m) => {
                let numeric: String = m.as_str().chars().filter(|c| !c.is_whitespace()).collect();
                match numeric.parse::<i32>() {
                    Ok(weight) => {
                        self.weight_tx.send_replace(Some(weight));
                        self.stable.store(line.starts_with('S'), Ordering::SeqCst);
                    }
                    Err(_) => self.clear_reading(line),
                }
            }
            None => self.clear_reading(line),
        }
        self.reading.store(false, Ordering::SeqCst);
    }

    fn clear_reading(&self, line: &str) {
        self.weight_tx.send_replace(None);
        self.stable.store(false, Ordering::SeqCst);
        if !line.starts_with("ST") && !line.starts_with("UT") {
            debug!(line, "no weight in scale reply");
        }
    }
}

#[async_trait::async_trait]
impl LineHandler for ScaleDriver {
    async fn handle_line(&self, line: &str) {
        self.ingest_reply(line);
        self.engine.handle_line(line).await;
    }

    async fn handle_disconnect(&self) {
        self.reading.store(false, Ordering::SeqCst);
        self.engine.clear().await;
    }
}

#[async_trait::async_trait]
impl rig_core::capabilities::WeightScale for ScaleDriver {
    async fn read_weight(&self, timeout: Duration) -> Result<Option<i32>> {
        ScaleDriver::read_weight(self, timeout).await
    }

    fn weight(&self) -> Option<i32> {
        ScaleDriver::weight(self)
    }

    fn is_stable(&self) -> bool {
        ScaleDriver::is_stable(self)
    }

    async fn tare(&self) -> Result<()> {
        ScaleDriver::tare(self).await
    }

    async fn zero(&self) -> Result<()> {
        ScaleDriver::zero(self).await
    }
}
