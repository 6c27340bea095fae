//! Scripted in-memory robot for tests and simulation.
//!
//! Mirrors the register semantics of the real controller program: writing
//! the goto-position register starts a "move", and the in-position flag
//! reads false for a configurable number of polls before settling true.
//! Every write is recorded so tests can assert on the exact register
//! traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{
    check_index, NumericRegister, RobotApi, FLAG_RANGE, NUMERIC_RANGE, STRING_RANGE,
};
use crate::position::RobotPosition;

/// One recorded register write.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterWrite {
    Flag(u16, bool),
    Numeric(u16, i32),
    Real(u16, f64),
    String(u16, String),
}

/// In-memory [`RobotApi`] twin.
pub struct MockRobot {
    flags: Mutex<HashMap<u16, bool>>,
    numerics: Mutex<HashMap<u16, NumericRegister>>,
    strings: Mutex<HashMap<u16, String>>,
    position: Mutex<RobotPosition>,
    writes: Mutex<Vec<RegisterWrite>>,
    reachable: AtomicBool,
    /// Polls a cleared flag register reads false before settling true.
    settle_polls: AtomicU32,
    polls_remaining: AtomicU32,
}

impl Default for MockRobot {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRobot {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(HashMap::new()),
            numerics: Mutex::new(HashMap::new()),
            strings: Mutex::new(HashMap::new()),
            position: Mutex::new(RobotPosition::unknown()),
            writes: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            settle_polls: AtomicU32::new(0),
            polls_remaining: AtomicU32::new(0),
        }
    }

    /// Flags cleared by `set_flag(_, false)` read false for `polls`
    /// subsequent reads before settling true.
    pub fn settle_after(self, polls: u32) -> Self {
        self.settle_polls.store(polls, Ordering::SeqCst);
        self
    }

    pub fn set_position(&self, position: RobotPosition) {
        *self.position.lock() = position;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Register writes in the order they arrived.
    pub fn writes(&self) -> Vec<RegisterWrite> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl RobotApi for MockRobot {
    async fn set_flag(&self, index: u16, value: bool) -> bool {
        check_index(index, FLAG_RANGE, "flag");
        self.flags.lock().insert(index, value);
        if !value {
            self.polls_remaining
                .store(self.settle_polls.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        self.writes.lock().push(RegisterWrite::Flag(index, value));
        true
    }

    async fn set_numeric(&self, index: u16, value: i32) -> bool {
        check_index(index, NUMERIC_RANGE, "numeric");
        self.numerics.lock().insert(index, NumericRegister::Int(value));
        self.writes.lock().push(RegisterWrite::Numeric(index, value));
        true
    }

    async fn set_real(&self, index: u16, value: f64) -> bool {
        check_index(index, NUMERIC_RANGE, "numeric");
        self.numerics.lock().insert(index, NumericRegister::Real(value));
        self.writes.lock().push(RegisterWrite::Real(index, value));
        true
    }

    async fn set_string(&self, index: u16, value: &str) -> bool {
        check_index(index, STRING_RANGE, "string");
        self.strings.lock().insert(index, value.to_string());
        self.writes
            .lock()
            .push(RegisterWrite::String(index, value.to_string()));
        true
    }

    // Flags not explicitly cleared read settled (true), so clear-then-poll
    // sequences work without extra scripting.
    async fn flag_register(&self, index: u16) -> bool {
        check_index(index, FLAG_RANGE, "flag");
        if self.flags.lock().get(&index).copied().unwrap_or(false) {
            return true;
        }
        // Simulate motion settling: count down the scripted polls.
        let remaining = self.polls_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.polls_remaining.store(remaining - 1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    async fn numeric_register(&self, index: u16) -> NumericRegister {
        check_index(index, NUMERIC_RANGE, "numeric");
        self.numerics
            .lock()
            .get(&index)
            .copied()
            .unwrap_or(NumericRegister::Unknown)
    }

    async fn string_register(&self, index: u16) -> String {
        check_index(index, STRING_RANGE, "string");
        self.strings.lock().get(&index).cloned().unwrap_or_default()
    }

    async fn change_override(&self, _percent: u8) -> bool {
        true
    }

    async fn current_position(&self) -> RobotPosition {
        *self.position.lock()
    }

    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::watch;

    #[tokio::test]
    async fn cleared_flag_settles_after_scripted_polls() {
        let robot = MockRobot::new().settle_after(2);
        robot.set_flag(1, false).await;

        assert!(!robot.flag_register(1).await);
        assert!(!robot.flag_register(1).await);
        assert!(robot.flag_register(1).await);
    }

    #[tokio::test]
    async fn wait_in_position_polls_until_settled_and_reports_feedback() {
        let robot = MockRobot::new().settle_after(3);
        robot.set_position(RobotPosition::decode(
            "X: 1.0 Y: 2.0 Z: 3.0 W: 4.0 P: 5.0 R: 6.0",
        ));
        robot.set_flag(1, false).await;

        let (tx, rx) = watch::channel(RobotPosition::unknown());
        robot
            .wait_in_position(1, Duration::from_millis(1), Duration::from_secs(1), Some(&tx))
            .await
            .unwrap();

        assert!(rx.borrow().is_valid());
    }

    #[tokio::test]
    async fn wait_in_position_times_out_when_never_settled() {
        let robot = MockRobot::new().settle_after(u32::MAX);
        robot.set_flag(1, false).await;

        let result = robot
            .wait_in_position(
                1,
                Duration::from_millis(1),
                Duration::from_millis(30),
                None,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "outside legal range")]
    async fn mock_enforces_index_preconditions() {
        let robot = MockRobot::new();
        robot.set_flag(201, true).await;
    }
}
