//! Six-axis robot position report.
//!
//! The controller reports the current world-frame position as a text
//! payload of the form
//! `X: 123.45 Y: -7.5 Z: 300.0 W: 0.0 P: 90.0 R: 180.0`. A position is
//! only meaningful when all six axes decode; anything less reads as the
//! all-unknown position, and the orchestrator must not advance on one.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"X:\s*([\d.-]+)\s*Y:\s*([\d.-]+)\s*Z:\s*([\d.-]+)\s*W:\s*([\d.-]+)\s*P:\s*([\d.-]+)\s*R:\s*([\d.-]+)",
        )
        .unwrap_or_else(|_| unreachable!())
    })
}

/// World-frame position: three translations and three rotations, rounded
/// to two decimals. All-`None` means "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotPosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub w: Option<f64>,
    pub p: Option<f64>,
    pub r: Option<f64>,
}

impl RobotPosition {
    /// The all-unknown position.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Decode a controller payload. Any mismatch or non-numeric capture
    /// yields the all-unknown position; this never fails.
    pub fn decode(payload: &str) -> Self {
        let Some(captures) = position_regex().captures(payload) else {
            return Self::unknown();
        };
        let axis = |i: usize| {
            captures
                .get(i)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .map(round2)
        };
        let decoded = Self {
            x: axis(1),
            y: axis(2),
            z: axis(3),
            w: axis(4),
            p: axis(5),
            r: axis(6),
        };
        // A capture that fails to parse (e.g. "--") poisons the report.
        if decoded.is_valid() {
            decoded
        } else {
            Self::unknown()
        }
    }

    /// True only when all six axes are known.
    pub fn is_valid(&self) -> bool {
        self.x.is_some()
            && self.y.is_some()
            && self.z.is_some()
            && self.w.is_some()
            && self.p.is_some()
            && self.r.is_some()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl std::fmt::Display for RobotPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_else(|| "?".into());
        write!(
            f,
            "X: {} Y: {} Z: {} W: {} P: {} R: {}",
            show(self.x),
            show(self.y),
            show(self.z),
            show(self.w),
            show(self.p),
            show(self.r),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_and_rounds_to_two_decimals() {
        let pos = RobotPosition::decode("X: 123.456 Y: -7.5 Z: 300.004 W: 0.0 P: 90.0 R: 179.999");
        assert_eq!(pos.x, Some(123.46));
        assert_eq!(pos.y, Some(-7.5));
        assert_eq!(pos.z, Some(300.0));
        assert_eq!(pos.w, Some(0.0));
        assert_eq!(pos.p, Some(90.0));
        assert_eq!(pos.r, Some(180.0));
        assert!(pos.is_valid());
    }

    #[test]
    fn display_round_trips_through_decode() {
        let original = RobotPosition {
            x: Some(10.25),
            y: Some(-3.1),
            z: Some(250.0),
            w: Some(0.5),
            p: Some(89.99),
            r: Some(-179.5),
        };
        let decoded = RobotPosition::decode(&original.to_string());
        assert_eq!(decoded, original);
    }

    #[test]
    fn non_matching_payload_is_unknown_and_never_panics() {
        for payload in ["", "garbage", "X: 1 Y: 2", "X: a Y: b Z: c W: d P: e R: f"] {
            let pos = RobotPosition::decode(payload);
            assert_eq!(pos, RobotPosition::unknown());
            assert!(!pos.is_valid());
        }
    }

    #[test]
    fn unparseable_axis_poisons_the_report() {
        // "--" matches the character class but is not a number.
        let pos = RobotPosition::decode("X: -- Y: 2.0 Z: 3.0 W: 4.0 P: 5.0 R: 6.0");
        assert_eq!(pos, RobotPosition::unknown());
    }
}
