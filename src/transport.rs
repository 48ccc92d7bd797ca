/*
 * @file transport.rs
 * @brief Serial transport and line assembly
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Line-delimited serial transport.
//!
//! The transport knows nothing about verbs or replies. It writes bytes and
//! hands back complete lines, returning `None` when the read timeout expires
//! without a full line.

use std::io::{self, Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serialport::SerialPort;
use tracing::{debug, info, warn};

/// Time to let the board reboot after the port is opened (DTR toggle).
const SERIAL_BOOT_DELAY: Duration = Duration::from_millis(150);

/// Size of a single read from the port.
const READ_CHUNK: usize = 64;

/// Longest line accepted from the device; longer runs are discarded.
pub const MAX_LINE: usize = 256;

/// Byte channel driven by the protocol engine.
///
/// # Details
/// The engine writes through the transport it is given and reads from a
/// [`Transport::try_clone`] of it on a separate thread, so reads never
/// delay a write.
pub trait Transport: Send {
    /// Writes `bytes` and flushes them to the device.
    ///
    /// # Errors
    /// Any error means the channel is unusable.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Waits up to the channel's read timeout for one complete line.
    ///
    /// # Details
    /// Returns as soon as a line is complete; the timeout only bounds how
    /// long an idle read blocks.
    ///
    /// # Returns
    /// * `Ok(Some(line))` - A line with its terminator stripped.
    /// * `Ok(None)` - The timeout expired without a complete line.
    ///
    /// # Errors
    /// Any error means the channel is closed and must not be retried.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Opens a second handle onto the same channel.
    ///
    /// # Errors
    /// Returns an error if the underlying device cannot be duplicated.
    fn try_clone(&self) -> io::Result<Self>
    where
        Self: Sized;
}

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// # Details
/// A trailing `\r` is stripped and bytes that are not UTF-8 are replaced.
/// A run longer than [`MAX_LINE`] without a terminator is dropped, along with
/// everything up to the next `\n`, so a babbling device cannot grow the
/// buffer without bound.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the device.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Removes and returns the first complete line, if any.
    pub fn take_line(&mut self) -> Option<String> {
        loop {
            let Some(newline) = self.bytes.iter().position(|&b| b == b'\n') else {
                if self.bytes.len() > MAX_LINE {
                    warn!(bytes = self.bytes.len(), "discarding overlong serial line");
                    self.bytes.clear();
                    self.discarding = true;
                }
                return None;
            };
            let raw: Vec<u8> = self.bytes.drain(..=newline).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if newline > MAX_LINE {
                warn!(bytes = newline, "discarding overlong serial line");
                continue;
            }
            let text = String::from_utf8_lossy(&raw[..newline]);
            return Some(text.trim_end_matches('\r').to_string());
        }
    }
}

/// [`Transport`] over a real serial port.
///
/// # Details
/// Keeps partial lines in a [`LineBuffer`] so a line split across two
/// timeouts is still delivered whole.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl SerialTransport {
    /// Opens the serial port, falling back to the callout variant.
    ///
    /// # Details
    /// Tries `path` first. If that fails and the path is a macOS
    /// `/dev/tty.*` device, tries the matching `/dev/cu.*` device. DTR and
    /// RTS are asserted and the board is given a moment to boot.
    ///
    /// # Arguments
    /// * `path` - Device path (e.g. "/dev/ttyACM0").
    /// * `baud` - Baud rate (the toy's firmware uses 9600).
    /// * `read_timeout` - Longest time an idle read blocks.
    ///
    /// # Returns
    /// * `Ok(SerialTransport)` - Port ready for I/O.
    ///
    /// # Errors
    /// Returns the primary open error if neither path can be opened.
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self> {
        let mut port = match open_serial_port(path, baud, read_timeout) {
            Ok(port) => port,
            Err(primary_err) => {
                let Some(callout) = callout_variant(path) else {
                    return Err(primary_err);
                };
                match open_serial_port(&callout, baud, read_timeout) {
                    Ok(port) => {
                        info!(primary = path, fallback = %callout, "primary port unavailable, using callout variant");
                        port
                    }
                    Err(_) => return Err(primary_err),
                }
            }
        };
        configure_port_signals(&mut port);
        Ok(Self::from_port(port))
    }

    /// Wraps an already opened port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            lines: LineBuffer::new(),
        }
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if let Some(line) = self.lines.take_line() {
                return Ok(Some(line));
            }
            match self.port.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial port returned end of stream",
                    ))
                }
                Ok(n) => self.lines.extend(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn try_clone(&self) -> io::Result<Self> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Self::from_port(port))
    }
}

/// Opens a serial port with the given read timeout.
fn open_serial_port(path: &str, baud: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    debug!(path, baud, "opening serial port");
    serialport::new(path, baud)
        .timeout(timeout)
        .open()
        .with_context(|| format!("Failed to open {}", path))
}

/// Sets DTR and RTS and waits for the board to boot.
fn configure_port_signals(port: &mut Box<dyn SerialPort>) {
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    std::thread::sleep(SERIAL_BOOT_DELAY);
}

/// Converts a `/dev/tty.*` device path to its `/dev/cu.*` callout variant.
///
/// # Returns
/// * `Some(String)` - The callout variant.
/// * `None` - If the path does not start with "/dev/tty.".
fn callout_variant(path: &str) -> Option<String> {
    let suffix = path.strip_prefix("/dev/tty.")?;
    Some(format!("/dev/cu.{}", suffix))
}

/// In-memory transport for exercising the engine without hardware.
#[cfg(test)]
pub(crate) mod mock {
    use super::Transport;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    /// Default time an idle read blocks before reporting `None`.
    const IDLE_READ: Duration = Duration::from_millis(2);

    type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

    struct Shared {
        writes: Vec<String>,
        inbound: VecDeque<String>,
        closed: bool,
        read_timeout: Duration,
        responder: Responder,
    }

    /// State shared by every clone of a transport and its handle.
    struct Link {
        shared: Mutex<Shared>,
        arrived: Condvar,
    }

    /// Transport whose replies are produced by a closure over each written line.
    ///
    /// # Details
    /// Reads block like a serial port: they return as soon as a line is
    /// queued, or `None` once the read timeout has passed.
    pub(crate) struct ScriptedTransport {
        link: Arc<Link>,
    }

    /// Test-side view of a [`ScriptedTransport`] owned by the worker.
    #[derive(Clone)]
    pub(crate) struct ScriptHandle {
        link: Arc<Link>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(
            responder: impl FnMut(&str) -> Vec<String> + Send + 'static,
        ) -> (Self, ScriptHandle) {
            let link = Arc::new(Link {
                shared: Mutex::new(Shared {
                    writes: Vec::new(),
                    inbound: VecDeque::new(),
                    closed: false,
                    read_timeout: IDLE_READ,
                    responder: Box::new(responder),
                }),
                arrived: Condvar::new(),
            });
            let handle = ScriptHandle { link: link.clone() };
            (Self { link }, handle)
        }

        /// Never answers anything.
        pub(crate) fn silent() -> (Self, ScriptHandle) {
            Self::new(|_| Vec::new())
        }

        /// Acknowledges every command by echoing its verb and argument.
        pub(crate) fn echo() -> (Self, ScriptHandle) {
            Self::new(|line| vec![line.replace(' ', "")])
        }
    }

    impl ScriptHandle {
        /// Lines written so far, without terminators.
        pub(crate) fn writes(&self) -> Vec<String> {
            self.link.shared.lock().unwrap().writes.clone()
        }

        /// Queues an unsolicited line from the device.
        pub(crate) fn push(&self, line: &str) {
            let mut shared = self.link.shared.lock().unwrap();
            shared.inbound.push_back(line.to_string());
            self.link.arrived.notify_all();
        }

        /// Makes every subsequent read fail.
        pub(crate) fn close(&self) {
            self.link.shared.lock().unwrap().closed = true;
            self.link.arrived.notify_all();
        }

        /// Sets how long an idle read blocks.
        pub(crate) fn set_read_timeout(&self, timeout: Duration) {
            self.link.shared.lock().unwrap().read_timeout = timeout;
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            let line = String::from_utf8_lossy(bytes).trim_end().to_string();
            let mut shared = self.link.shared.lock().unwrap();
            let replies = (shared.responder)(&line);
            shared.writes.push(line);
            shared.inbound.extend(replies);
            self.link.arrived.notify_all();
            Ok(())
        }

        fn read_line(&mut self) -> io::Result<Option<String>> {
            let shared = self.link.shared.lock().unwrap();
            let timeout = shared.read_timeout;
            let (mut shared, _) = self
                .link
                .arrived
                .wait_timeout_while(shared, timeout, |s| s.inbound.is_empty() && !s.closed)
                .unwrap();
            if shared.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            Ok(shared.inbound.pop_front())
        }

        fn try_clone(&self) -> io::Result<Self> {
            Ok(Self {
                link: self.link.clone(),
            })
        }
    }
}
