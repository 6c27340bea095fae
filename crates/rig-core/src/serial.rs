//! Serial port abstractions for the device drivers.
//!
//! All rig devices speak line-oriented ASCII over a byte stream with `\r\n`
//! framing. This module provides the shared plumbing:
//!
//! - [`SerialPortIO`]: trait alias combining `AsyncRead + AsyncWrite`
//! - [`DynSerial`]: type-erased boxed serial port
//! - [`split_port`]: split a port into a buffered line reader and a shared
//!   writer half
//! - [`spawn_line_reader`]: drive a [`LineHandler`] from the read half
//! - [`open_serial_async`]: open real hardware (requires the `serial`
//!   feature)
//!
//! Tests substitute `tokio::io::duplex` for the hardware port; anything
//! implementing the async I/O traits works.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Shared write half of a serial port.
///
/// The read half lives on the driver's reader task, so writes go through a
/// separate, mutex-protected half.
pub type SharedWriter = Arc<Mutex<WriteHalf<DynSerial>>>;

/// Buffered read half of a serial port, for `read_line`.
pub type LineReader = BufReader<ReadHalf<DynSerial>>;

/// Split a port into a buffered line reader and a shared writer half.
pub fn split_port(port: DynSerial) -> (LineReader, SharedWriter) {
    let (read, write) = tokio::io::split(port);
    (BufReader::new(read), Arc::new(Mutex::new(write)))
}

/// Receiver of framed lines from a device.
///
/// Implemented by each device driver: measurement lines are parsed in place,
/// everything else is handed to the driver's protocol engine.
#[async_trait::async_trait]
pub trait LineHandler: Send + Sync {
    /// Called once per non-empty received line, already trimmed of the
    /// `\r\n` framing.
    async fn handle_line(&self, line: &str);

    /// Called when the transport reaches EOF or fails. Drivers clear their
    /// command queue here so the orchestrator cannot hang on a dead port.
    async fn handle_disconnect(&self) {}
}

/// Spawn the read loop for a device.
///
/// Reads `\r\n`-delimited lines until EOF or I/O error, feeding each
/// non-empty line to the handler. The task ends on disconnect after
/// notifying the handler.
pub fn spawn_line_reader(mut reader: LineReader, handler: Arc<dyn LineHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = buf.trim();
                    if !line.is_empty() {
                        handler.handle_line(line).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "serial read failed");
                    break;
                }
            }
        }
        handler.handle_disconnect().await;
    })
}

/// Open a serial port asynchronously (8N1, no flow control).
///
/// Uses `spawn_blocking` so the potentially slow open does not stall the
/// runtime.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use anyhow::Context;
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let name = device_name.to_string();
    let port = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open {} serial port: {}", name, path))
    })
    .await
    .context("spawn_blocking for serial port opening failed")??;

    tracing::info!(port = %port_path, baud = baud_rate, device = %device_name, "serial port open");
    Ok(port)
}
