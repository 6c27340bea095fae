//! Line protocol engine.
//!
//! The pad, scale and environment controllers all speak a queued
//! command/acknowledgment protocol over their serial link: commands are
//! FIFO-queued, exactly one is on the wire at a time, and the next is not
//! written until the device has answered the current one. What counts as an
//! answer differs per controller, captured by [`AckPolicy`]:
//!
//! - `OkEcho` (pad): the device echoes `OK <command>` on success and `ERR...`
//!   on failure. An `ERR` resends the command once, then drops it.
//! - `FirstResponse` (scale, field meter): the reply is a data line; the
//!   first line received while a command is outstanding completes it.
//! - `FireAndForget` (environment): no reply expected; the queue only
//!   serializes writes.
//!
//! Each enqueued command carries a oneshot [`Completion`] resolved with the
//! command's [`CommandOutcome`]; callers await it instead of observing
//! driver state. Disconnecting clears the queue, resolving everything as
//! `Cancelled`, without retrying.
//!
//! Physical controllers need a short turnaround between an acknowledgment
//! and the next command; the engine inserts a deterministic ~15 ms delay.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::serial::SharedWriter;

/// Default controller turnaround between an ack and the next write.
pub const DEFAULT_TURNAROUND: Duration = Duration::from_millis(15);

/// How a device signals that a command has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// `OK <command>` echo acknowledges; `ERR` retries once then drops.
    OkEcho,
    /// The first received line completes the outstanding command.
    FirstResponse,
    /// No reply expected; commands complete as soon as they are written.
    FireAndForget,
}

/// Final state of an enqueued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The device acknowledged the command.
    Acknowledged,
    /// The device rejected the command twice (`ERR` after one resend).
    Failed,
    /// The queue was cleared before the command completed.
    Cancelled,
}

/// Awaitable completion of a single enqueued command.
pub struct Completion(oneshot::Receiver<CommandOutcome>);

impl Completion {
    /// Wait for the command to finish. A dropped engine reads as
    /// `Cancelled`.
    pub async fn wait(self) -> CommandOutcome {
        self.0.await.unwrap_or(CommandOutcome::Cancelled)
    }
}

struct Pending {
    text: String,
    sent: bool,
    retried: bool,
    done: Option<oneshot::Sender<CommandOutcome>>,
}

impl Pending {
    fn resolve(mut self, outcome: CommandOutcome) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Queued request/acknowledgment engine over a line-oriented serial link.
pub struct LineEngine {
    writer: SharedWriter,
    queue: Mutex<VecDeque<Pending>>,
    policy: AckPolicy,
    turnaround: Duration,
    /// Single-byte wire aliases for hot-path commands. Ack matching always
    /// uses the full text; only the bytes on the wire are shortened.
    aliases: &'static [(&'static str, &'static str)],
    device: &'static str,
}

impl LineEngine {
    pub fn new(writer: SharedWriter, policy: AckPolicy, device: &'static str) -> Self {
        Self {
            writer,
            queue: Mutex::new(VecDeque::new()),
            policy,
            turnaround: DEFAULT_TURNAROUND,
            aliases: &[],
            device,
        }
    }

    /// Replace the wire alias table.
    pub fn with_aliases(mut self, aliases: &'static [(&'static str, &'static str)]) -> Self {
        self.aliases = aliases;
        self
    }

    /// Override the controller turnaround delay.
    pub fn with_turnaround(mut self, turnaround: Duration) -> Self {
        self.turnaround = turnaround;
        self
    }

    /// Number of commands queued or in flight.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Queue a command, writing it immediately if the wire is idle.
    pub async fn enqueue(&self, command: impl Into<String>) -> Completion {
        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            queue.push_back(Pending {
                text: command.into(),
                sent: false,
                retried: false,
                done: Some(tx),
            });
        }
        self.pump().await;
        Completion(rx)
    }

    /// Drop every queued command, resolving completions as `Cancelled`.
    ///
    /// Used at disconnect and for forced stops; nothing is retried.
    pub async fn clear(&self) {
        let drained: Vec<Pending> = self.queue.lock().await.drain(..).collect();
        if !drained.is_empty() {
            debug!(device = self.device, dropped = drained.len(), "command queue cleared");
        }
        for pending in drained {
            pending.resolve(CommandOutcome::Cancelled);
        }
    }

    /// Offer a received line that the driver did not consume as measurement
    /// data.
    pub async fn handle_line(&self, line: &str) {
        match self.policy {
            AckPolicy::FireAndForget => {
                debug!(device = self.device, line, "unsolicited line discarded");
            }
            AckPolicy::FirstResponse => self.complete_head(CommandOutcome::Acknowledged).await,
            AckPolicy::OkEcho => self.handle_echo_line(line).await,
        }
    }

    /// Resolve the in-flight command, then advance the queue.
    ///
    /// `FirstResponse` drivers call this from their measurement parser once
    /// they have recognized the reply to the outstanding command.
    pub async fn complete_head(&self, outcome: CommandOutcome) {
        let head = {
            let mut queue = self.queue.lock().await;
            let in_flight = matches!(queue.front(), Some(head) if head.sent);
            if in_flight {
                queue.pop_front()
            } else {
                None
            }
        };
        if let Some(head) = head {
            head.resolve(outcome);
            tokio::time::sleep(self.turnaround).await;
            self.pump().await;
        }
    }

    async fn handle_echo_line(&self, line: &str) {
        if let Some(echoed) = line.strip_prefix("OK ") {
            let acked = {
                let mut queue = self.queue.lock().await;
                let matches_head =
                    matches!(queue.front(), Some(head) if head.sent && head.text == echoed);
                if matches_head {
                    queue.pop_front()
                } else {
                    None
                }
            };
            match acked {
                Some(head) => {
                    debug!(device = self.device, command = %head.text, "acknowledged");
                    head.resolve(CommandOutcome::Acknowledged);
                    tokio::time::sleep(self.turnaround).await;
                    self.pump().await;
                }
                None => debug!(device = self.device, line, "OK without matching command"),
            }
        } else if line.starts_with("OK") {
            debug!(device = self.device, line, "bare OK discarded");
        } else if line.starts_with("ERR") {
            self.handle_err_line(line).await;
        } else {
            debug!(device = self.device, line, "unrecognized line discarded");
        }
    }

    async fn handle_err_line(&self, line: &str) {
        let mut resend: Option<String> = None;
        let mut dropped: Option<Pending> = None;
        {
            let mut queue = self.queue.lock().await;
            let drop_head = match queue.front_mut() {
                Some(head) if head.sent && !head.retried => {
                    head.retried = true;
                    resend = Some(head.text.clone());
                    false
                }
                Some(head) if head.sent => true,
                _ => false,
            };
            if drop_head {
                dropped = queue.pop_front();
            }
        }

        if let Some(text) = resend {
            warn!(device = self.device, command = %text, line, "rejected, resending once");
            tokio::time::sleep(self.turnaround).await;
            if self.write_wire(&text).await.is_err() {
                self.clear().await;
            }
        } else if let Some(head) = dropped {
            warn!(device = self.device, command = %head.text, line, "rejected twice, dropping");
            head.resolve(CommandOutcome::Failed);
            tokio::time::sleep(self.turnaround).await;
            self.pump().await;
        } else {
            debug!(device = self.device, line, "ERR without in-flight command");
        }
    }

    /// Write the queue head if the wire is idle; for fire-and-forget
    /// devices, keep going until the queue drains.
    async fn pump(&self) {
        loop {
            let to_write = {
                let mut queue = self.queue.lock().await;
                match queue.front_mut() {
                    Some(head) if !head.sent => {
                        head.sent = true;
                        Some(head.text.clone())
                    }
                    _ => None,
                }
            };
            let Some(text) = to_write else { break };

            if self.write_wire(&text).await.is_err() {
                self.clear().await;
                break;
            }

            if self.policy == AckPolicy::FireAndForget {
                if let Some(head) = self.queue.lock().await.pop_front() {
                    head.resolve(CommandOutcome::Acknowledged);
                }
                tokio::time::sleep(self.turnaround).await;
                continue;
            }
            break;
        }
    }

    async fn write_wire(&self, text: &str) -> std::io::Result<()> {
        let wire = self
            .aliases
            .iter()
            .find(|(full, _)| *full == text)
            .map(|(_, short)| *short)
            .unwrap_or(text);

        debug!(device = self.device, command = text, wire, "write");
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(format!("{}\r\n", wire).as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = &result {
            warn!(device = self.device, error = %e, "serial write failed, clearing queue");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::split_port;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn engine(policy: AckPolicy) -> (LineEngine, BufReader<tokio::io::DuplexStream>) {
        let (host, device) = tokio::io::duplex(1024);
        let (_reader, writer) = split_port(Box::new(device));
        let engine = LineEngine::new(writer, policy, "test")
            .with_turnaround(Duration::from_millis(1));
        (engine, BufReader::new(host))
    }

    async fn next_wire_line(host: &mut BufReader<tokio::io::DuplexStream>) -> String {
        let mut line = String::new();
        host.read_line(&mut line).await.unwrap();
        line.trim().to_string()
    }

    #[tokio::test]
    async fn one_command_in_flight_fifo_order() {
        let (engine, mut host) = engine(AckPolicy::OkEcho);

        let first = engine.enqueue("SET 1 5000").await;
        let _second = engine.enqueue("SET 2 6000").await;

        assert_eq!(next_wire_line(&mut host).await, "SET 1 5000");
        assert_eq!(engine.pending().await, 2);

        // Second command must not hit the wire before the first is acked.
        let premature = tokio::time::timeout(Duration::from_millis(20), async {
            let mut buf = String::new();
            host.read_line(&mut buf).await.unwrap();
            buf
        })
        .await;
        assert!(premature.is_err());

        engine.handle_line("OK SET 1 5000").await;
        assert_eq!(first.wait().await, CommandOutcome::Acknowledged);
        assert_eq!(next_wire_line(&mut host).await, "SET 2 6000");
    }

    #[tokio::test]
    async fn err_resends_once_then_drops() {
        let (engine, mut host) = engine(AckPolicy::OkEcho);

        let completion = engine.enqueue("PUL ST+").await;
        assert_eq!(next_wire_line(&mut host).await, "PUL ST+");

        engine.handle_line("ERR 12").await;
        assert_eq!(next_wire_line(&mut host).await, "PUL ST+");

        engine.handle_line("ERR 12").await;
        assert_eq!(completion.wait().await, CommandOutcome::Failed);
        assert_eq!(engine.pending().await, 0);
    }

    #[tokio::test]
    async fn mismatched_ok_does_not_advance() {
        let (engine, mut host) = engine(AckPolicy::OkEcho);

        let completion = engine.enqueue("SET 4 20").await;
        assert_eq!(next_wire_line(&mut host).await, "SET 4 20");

        engine.handle_line("OK SET 9 99").await;
        engine.handle_line("garbage").await;
        assert_eq!(engine.pending().await, 1);

        engine.handle_line("OK SET 4 20").await;
        assert_eq!(completion.wait().await, CommandOutcome::Acknowledged);
    }

    #[tokio::test]
    async fn clear_cancels_queued_commands() {
        let (engine, mut host) = engine(AckPolicy::OkEcho);

        let first = engine.enqueue("PUS DRP").await;
        let second = engine.enqueue("REL SBY").await;
        assert_eq!(next_wire_line(&mut host).await, "PUS DRP");

        engine.clear().await;
        assert_eq!(first.wait().await, CommandOutcome::Cancelled);
        assert_eq!(second.wait().await, CommandOutcome::Cancelled);
        assert_eq!(engine.pending().await, 0);
    }

    #[tokio::test]
    async fn first_response_completes_on_any_line() {
        let (engine, mut host) = engine(AckPolicy::FirstResponse);

        let completion = engine.enqueue("Sx3").await;
        assert_eq!(next_wire_line(&mut host).await, "Sx3");

        engine.handle_line("S   +5100").await;
        assert_eq!(completion.wait().await, CommandOutcome::Acknowledged);
        assert_eq!(engine.pending().await, 0);
    }

    #[tokio::test]
    async fn fire_and_forget_drains_queue_in_order() {
        let (engine, mut host) = engine(AckPolicy::FireAndForget);

        let first = engine.enqueue("SEND AUTO OFF").await;
        let second = engine.enqueue("SEND AUTO ON").await;

        assert_eq!(first.wait().await, CommandOutcome::Acknowledged);
        assert_eq!(second.wait().await, CommandOutcome::Acknowledged);
        assert_eq!(next_wire_line(&mut host).await, "SEND AUTO OFF");
        assert_eq!(next_wire_line(&mut host).await, "SEND AUTO ON");
    }

    #[tokio::test]
    async fn aliases_shorten_wire_text_but_ack_full_text() {
        static ALIASES: &[(&str, &str)] = &[("REL SBY", "R")];
        let (host, device) = tokio::io::duplex(1024);
        let (_reader, writer) = split_port(Box::new(device));
        let engine = LineEngine::new(writer, AckPolicy::OkEcho, "pad")
            .with_turnaround(Duration::from_millis(1))
            .with_aliases(ALIASES);
        let mut host = BufReader::new(host);

        let completion = engine.enqueue("REL SBY").await;
        assert_eq!(next_wire_line(&mut host).await, "R");

        engine.handle_line("OK REL SBY").await;
        assert_eq!(completion.wait().await, CommandOutcome::Acknowledged);
    }
}
