//! HTTP register client for the robot controller.
//!
//! Wire formats (fixed by the controller firmware):
//!
//! - flag read:   `http://<ip>:3080/COMET/rpc?func=IOVALRD&type=35&index=<n>`
//! - flag write:  `http://<ip>:3080/COMET/rpc?func=IOVALSET&type=35&index=<n>&value=<0|1>`
//! - numeric read: `http://<ip>:3080/COMET/rpc?func=REGVALRD&index=<n>`
//! - numeric write: `http://<ip>/karel/ComSet?sValue=<v>&sIndx=<n>&sRealFlag=<0|1>&sFc=2`
//! - string write: `http://<ip>/karel/ComSet?sValue=<v>&sIndx=<n>&sFc=15`
//! - string read:  `http://<ip>/MD/STRREG.VA` (variable dump)
//! - position:    `http://<ip>/COMET/rpc?func=TXML_CURPOS&pos_rep=1&pos_type=1&grp_num=1`
//! - speed override: `http://<ip>:3080/COMET/rpc?func=CHGOVRD&ovrd_val=<v>`
//!
//! Failure semantics: network errors never escape — writes read back as
//! `false` ("not yet confirmed", the caller keeps polling), reads as
//! `false`/`Unknown`/the unknown position. Register indices, by contrast,
//! are validated against the legal range of each register class and panic
//! when out of range: a bad index is a programming error, not a runtime
//! fault.

use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::position::RobotPosition;

/// Legal index range for flag registers (`F[n]`).
pub const FLAG_RANGE: RangeInclusive<u16> = 1..=200;
/// Legal index range for numeric registers (`R[n]`).
pub const NUMERIC_RANGE: RangeInclusive<u16> = 1..=200;
/// Legal index range for string registers (`SR[n]`).
pub const STRING_RANGE: RangeInclusive<u16> = 1..=25;

pub(crate) fn check_index(index: u16, range: RangeInclusive<u16>, class: &str) {
    assert!(
        range.contains(&index),
        "{} register index {} outside legal range {}..={}",
        class,
        index,
        range.start(),
        range.end()
    );
}

/// A numeric register holds either an integer or a real; `Unknown` covers
/// unreachable controllers and unparseable replies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericRegister {
    Int(i32),
    Real(f64),
    Unknown,
}

/// Reachability probe settings: attempts × per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub attempts: u32,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 20,
            timeout: Duration::from_millis(250),
        }
    }
}

/// Register-level robot operations.
///
/// Implemented by [`RobotClient`] for real hardware and
/// [`crate::MockRobot`] for tests. `wait_in_position` is provided on top
/// of the primitive operations.
#[async_trait]
pub trait RobotApi: Send + Sync {
    async fn set_flag(&self, index: u16, value: bool) -> bool;
    async fn set_numeric(&self, index: u16, value: i32) -> bool;
    async fn set_real(&self, index: u16, value: f64) -> bool;
    async fn set_string(&self, index: u16, value: &str) -> bool;
    async fn flag_register(&self, index: u16) -> bool;
    async fn numeric_register(&self, index: u16) -> NumericRegister;
    async fn string_register(&self, index: u16) -> String;
    async fn change_override(&self, percent: u8) -> bool;
    async fn current_position(&self) -> RobotPosition;
    async fn is_reachable(&self) -> bool;

    /// Poll the in-position flag until it reads true, republishing valid
    /// intermediate positions for UI feedback. One poll is in flight at a
    /// time by construction (a single await chain).
    async fn wait_in_position(
        &self,
        in_position_index: u16,
        period: Duration,
        timeout: Duration,
        feedback: Option<&watch::Sender<RobotPosition>>,
    ) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            if self.flag_register(in_position_index).await {
                return Ok(());
            }
            let position = self.current_position().await;
            if position.is_valid() {
                if let Some(tx) = feedback {
                    tx.send_replace(position);
                }
            }
            if started.elapsed() > timeout {
                anyhow::bail!("robot did not reach position within {:?}", timeout);
            }
            tokio::time::sleep(period).await;
        }
    }
}

// COMET RPC reply envelope: {"FANUC": {"name": ..., "RPC": [{"value": ...}]}}
#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(alias = "FANUC", alias = "Fanuc")]
    fanuc: RpcBody,
}

#[derive(Debug, Deserialize)]
struct RpcBody {
    #[serde(default, alias = "RPC", alias = "Rpc")]
    rpc: Vec<RpcSlot>,
}

#[derive(Debug, Deserialize)]
struct RpcSlot {
    #[serde(default, alias = "VALUE", alias = "Value")]
    value: serde_json::Value,
}

impl RpcEnvelope {
    fn first_value(&self) -> Option<String> {
        match self.fanuc.rpc.first().map(|slot| &slot.value) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// HTTP client for one robot controller.
pub struct RobotClient {
    http: reqwest::Client,
    ip: String,
    probe: ProbeConfig,
}

impl RobotClient {
    /// Create a client for the controller at `ip` with default probing.
    pub fn new(ip: impl Into<String>) -> Result<Self> {
        Self::with_probe(ip, ProbeConfig::default())
    }

    pub fn with_probe(ip: impl Into<String>, probe: ProbeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build robot HTTP client")?;
        Ok(Self {
            http,
            ip: ip.into(),
            probe,
        })
    }

    async fn get_envelope(&self, url: String) -> Option<RpcEnvelope> {
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    debug!(url, error = %e, "robot reply did not decode");
                    None
                }
            },
            Ok(response) => {
                debug!(url, status = %response.status(), "robot rejected request");
                None
            }
            Err(e) => {
                debug!(url, error = %e, "robot request failed");
                None
            }
        }
    }

    async fn get_ok(&self, url: String) -> bool {
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "robot request failed");
                false
            }
        }
    }

    async fn get_text(&self, url: String) -> Option<String> {
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            _ => None,
        }
    }
}

#[async_trait]
impl RobotApi for RobotClient {
    #[instrument(skip(self))]
    async fn set_flag(&self, index: u16, value: bool) -> bool {
        check_index(index, FLAG_RANGE, "flag");
        self.get_ok(format!(
            "http://{}:3080/COMET/rpc?func=IOVALSET&type=35&index={}&value={}",
            self.ip,
            index,
            u8::from(value)
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn set_numeric(&self, index: u16, value: i32) -> bool {
        check_index(index, NUMERIC_RANGE, "numeric");
        self.get_ok(format!(
            "http://{}/karel/ComSet?sValue={}&sIndx={}&sRealFlag=0&sFc=2",
            self.ip, value, index
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn set_real(&self, index: u16, value: f64) -> bool {
        check_index(index, NUMERIC_RANGE, "numeric");
        self.get_ok(format!(
            "http://{}/karel/ComSet?sValue={:.6}&sIndx={}&sRealFlag=1&sFc=2",
            self.ip, value, index
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn set_string(&self, index: u16, value: &str) -> bool {
        check_index(index, STRING_RANGE, "string");
        self.get_ok(format!(
            "http://{}/karel/ComSet?sValue={}&sIndx={}&sFc=15",
            self.ip, value, index
        ))
        .await
    }

    async fn flag_register(&self, index: u16) -> bool {
        check_index(index, FLAG_RANGE, "flag");
        let envelope = self
            .get_envelope(format!(
                "http://{}:3080/COMET/rpc?func=IOVALRD&type=35&index={}",
                self.ip, index
            ))
            .await;
        matches!(envelope.and_then(|e| e.first_value()).as_deref(), Some("1"))
    }

    async fn numeric_register(&self, index: u16) -> NumericRegister {
        check_index(index, NUMERIC_RANGE, "numeric");
        let value = self
            .get_envelope(format!(
                "http://{}:3080/COMET/rpc?func=REGVALRD&index={}",
                self.ip, index
            ))
            .await
            .and_then(|e| e.first_value());
        match value {
            Some(text) => parse_numeric(&text),
            None => NumericRegister::Unknown,
        }
    }

    async fn string_register(&self, index: u16) -> String {
        check_index(index, STRING_RANGE, "string");
        let Some(body) = self.get_text(format!("http://{}/MD/STRREG.VA", self.ip)).await else {
            return String::new();
        };
        parse_string_registers(&body)
            .get(usize::from(index) - 1)
            .cloned()
            .unwrap_or_default()
    }

    #[instrument(skip(self))]
    async fn change_override(&self, percent: u8) -> bool {
        self.get_ok(format!(
            "http://{}:3080/COMET/rpc?func=CHGOVRD&ovrd_val={}",
            self.ip, percent
        ))
        .await
    }

    async fn current_position(&self) -> RobotPosition {
        let payload = self
            .get_envelope(format!(
                "http://{}/COMET/rpc?func=TXML_CURPOS&pos_rep=1&pos_type=1&grp_num=1",
                self.ip
            ))
            .await
            .and_then(|e| e.first_value());
        match payload {
            Some(text) => RobotPosition::decode(&text),
            None => RobotPosition::unknown(),
        }
    }

    /// TCP probe of the controller's web port with bounded retries.
    async fn is_reachable(&self) -> bool {
        for attempt in 1..=self.probe.attempts {
            let connect = TcpStream::connect((self.ip.as_str(), 80));
            match tokio::time::timeout(self.probe.timeout, connect).await {
                Ok(Ok(_)) => {
                    debug!(ip = %self.ip, attempt, "robot reachable");
                    return true;
                }
                Ok(Err(e)) => debug!(ip = %self.ip, attempt, error = %e, "probe refused"),
                Err(_) => debug!(ip = %self.ip, attempt, "probe timed out"),
            }
            if attempt < self.probe.attempts {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        warn!(ip = %self.ip, attempts = self.probe.attempts, "robot offline");
        false
    }
}

fn parse_numeric(text: &str) -> NumericRegister {
    if let Ok(int) = text.trim().parse::<i32>() {
        NumericRegister::Int(int)
    } else if let Ok(real) = text.trim().parse::<f64>() {
        NumericRegister::Real(real)
    } else {
        NumericRegister::Unknown
    }
}

/// Extract string register values from a controller variable dump.
///
/// The dump is an HTML page whose `<pre>` block lists one register per
/// line as `SR[<n>] = 'value'`; registers are returned in index order.
pub(crate) fn parse_string_registers(body: &str) -> Vec<String> {
    let lower = body.to_lowercase();
    let pre = match (lower.find("<pre>"), lower.find("</pre>")) {
        (Some(start), Some(end)) if start + 5 <= end => &body[start + 5..end],
        _ => body,
    };
    pre.lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once('=')?;
            let rest = rest.trim();
            let value = rest
                .strip_prefix('\'')
                .and_then(|v| v.split('\'').next())
                .unwrap_or(rest);
            Some(value.trim_end().to_string())
        })
        .collect()
}
