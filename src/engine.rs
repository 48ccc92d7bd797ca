/*
 * @file engine.rs
 * @brief Protocol engine worker owning the serial channel
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

//! Protocol engine: a single worker that owns the serial channel.
//!
//! Callers hand the worker one exchange at a time over a `crossbeam`
//! channel and block on a one-slot reply channel. A reader thread blocks on
//! the transport and forwards every line, so the worker writes a command the
//! moment it arrives and unsolicited light readings reach the observer even
//! when nothing is pending.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, select, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::{ControlError, ControlResult};
use crate::protocol::{Command, DecodeError, Message, Reply, VERB_LIGHT};
use crate::transport::Transport;

/// Callback invoked on the worker thread for every light reading.
///
/// # Details
/// Runs inside the worker, so it must not issue commands through the same
/// engine; forward the value to another thread instead.
pub type LightObserver = Box<dyn FnMut(i32) + Send + 'static>;

/// Outcome of one transport read, as forwarded by the reader thread.
type ReadResult = io::Result<Option<String>>;

/// Request handed to the worker.
struct Exchange {
    command: Command,
    timeout: Duration,
    resyncs: Option<u32>,
    reply: Sender<ControlResult<Reply>>,
}

/// The one exchange the worker is currently waiting on.
struct Pending {
    verb: char,
    expected: Option<i32>,
    resyncs_left: u32,
    timeout: Duration,
    deadline: Instant,
    reply: Sender<ControlResult<Reply>>,
}

/// Handle to the control worker.
///
/// # Details
/// Cloning is not supported; share the handle behind a reference. Dropping
/// it closes the request channel and joins both threads.
pub struct Engine {
    requests: Option<Sender<Exchange>>,
    worker: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Engine {
    /// Starts the reader and worker threads on `transport`.
    ///
    /// # Details
    /// The worker keeps `transport` for writing. The reader thread owns a
    /// [`Transport::try_clone`] of it and exits once the worker is gone or
    /// the channel fails.
    ///
    /// # Arguments
    /// * `transport` - Channel the engine takes exclusive ownership of.
    /// * `observer` - Optional receiver of unsolicited light readings.
    ///
    /// # Returns
    /// * `Ok(Engine)` - Handle for submitting exchanges.
    ///
    /// # Errors
    /// Returns [`ControlError::ChannelClosed`] if the transport cannot be
    /// cloned or a thread cannot be spawned.
    pub fn spawn<T>(transport: T, observer: Option<LightObserver>) -> ControlResult<Self>
    where
        T: Transport + 'static,
    {
        let source = transport
            .try_clone()
            .map_err(|err| ControlError::ChannelClosed(err.to_string()))?;
        let (forward, lines) = channel::unbounded();
        let reader = thread::Builder::new()
            .name("furby-reader".to_string())
            .spawn(move || read_lines(source, forward))
            .map_err(|err| ControlError::ChannelClosed(err.to_string()))?;

        let (requests, inbox) = channel::unbounded();
        let worker = Worker {
            transport,
            requests: inbox,
            lines,
            observer,
            pending: None,
        };
        let handle = thread::Builder::new()
            .name("furby-control".to_string())
            .spawn(move || worker.run())
            .map_err(|err| ControlError::ChannelClosed(err.to_string()))?;
        Ok(Self {
            requests: Some(requests),
            worker: Some(handle),
            reader: Some(reader),
        })
    }

    /// Sends `command` and waits for the reply carrying the same verb.
    ///
    /// # Details
    /// Blocks the calling thread. If another exchange is in flight the
    /// command waits in the worker's queue until that exchange resolves.
    ///
    /// # Arguments
    /// * `command` - Command to transmit.
    /// * `timeout` - Window for the reply, starting when the command is written.
    ///
    /// # Returns
    /// * `Ok(Reply)` - The matching reply; its payload may be absent.
    ///
    /// # Errors
    /// * [`ControlError::CommandTimeout`] if no reply arrived in time.
    /// * [`ControlError::Device`] on the error verb or an out-of-sequence reply.
    /// * [`ControlError::ChannelClosed`] if the worker has stopped.
    pub fn send_and_await(&self, command: Command, timeout: Duration) -> ControlResult<Reply> {
        self.submit(command, timeout, None)
    }

    /// Like [`Engine::send_and_await`], but insists the reply echoes the
    /// command's argument.
    ///
    /// # Details
    /// A reply with the right verb but a different payload keeps the exchange
    /// open for up to `resyncs` further replies, each with a fresh `timeout`.
    /// A reply without payload is accepted as-is.
    ///
    /// # Errors
    /// As [`Engine::send_and_await`]; running out of resyncs is
    /// [`ControlError::Device`].
    pub fn send_and_confirm(
        &self,
        command: Command,
        timeout: Duration,
        resyncs: u32,
    ) -> ControlResult<Reply> {
        self.submit(command, timeout, Some(resyncs))
    }

    fn submit(
        &self,
        command: Command,
        timeout: Duration,
        resyncs: Option<u32>,
    ) -> ControlResult<Reply> {
        let requests = self.requests.as_ref().ok_or_else(worker_gone)?;
        let (reply, answer) = channel::bounded(1);
        requests
            .send(Exchange {
                command,
                timeout,
                resyncs,
                reply,
            })
            .map_err(|_| worker_gone())?;
        answer.recv().map_err(|_| worker_gone())?
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// Reader thread body: forwards every read until the worker hangs up.
///
/// # Details
/// Idle reads are forwarded too, so a dropped worker is noticed within one
/// read timeout. A read error is forwarded once and ends the thread.
fn read_lines<T: Transport>(mut source: T, forward: Sender<ReadResult>) {
    loop {
        let result = source.read_line();
        let failed = result.is_err();
        if forward.send(result).is_err() || failed {
            debug!("serial reader exiting");
            return;
        }
    }
}

fn worker_gone() -> ControlError {
    ControlError::ChannelClosed("control worker is not running".to_string())
}

struct Worker<T> {
    transport: T,
    requests: Receiver<Exchange>,
    lines: Receiver<ReadResult>,
    observer: Option<LightObserver>,
    pending: Option<Pending>,
}

/// What woke the worker up.
enum Event {
    Request(Exchange),
    HandleDropped,
    Read(ReadResult),
    ReaderGone,
    Deadline,
}

impl<T: Transport> Worker<T> {
    /// Event loop; returns when the handle is dropped or the channel fails.
    fn run(mut self) {
        debug!("control worker started");
        loop {
            match self.next_event() {
                Event::Request(exchange) => {
                    if let Err(err) = self.begin(exchange) {
                        self.shutdown(err);
                        return;
                    }
                }
                Event::HandleDropped => {
                    debug!("control handle dropped, worker exiting");
                    return;
                }
                Event::Read(Ok(Some(line))) => self.dispatch(&line),
                Event::Read(Ok(None)) | Event::Deadline => {}
                Event::Read(Err(err)) => {
                    self.shutdown(err);
                    return;
                }
                Event::ReaderGone => {
                    self.shutdown(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "serial reader stopped",
                    ));
                    return;
                }
            }
            self.expire(Instant::now());
        }
    }

    /// Blocks until a request can be taken, a read completes, or the
    /// pending exchange reaches its deadline.
    ///
    /// # Details
    /// New requests are only taken while idle, which keeps a single exchange
    /// in flight.
    fn next_event(&self) -> Event {
        let idle = channel::never();
        let requests = if self.pending.is_none() {
            &self.requests
        } else {
            &idle
        };
        let deadline = match &self.pending {
            Some(pending) => channel::at(pending.deadline),
            None => channel::never(),
        };
        select! {
            recv(requests) -> exchange => match exchange {
                Ok(exchange) => Event::Request(exchange),
                Err(_) => Event::HandleDropped,
            },
            recv(self.lines) -> result => match result {
                Ok(result) => Event::Read(result),
                Err(_) => Event::ReaderGone,
            },
            recv(deadline) -> _ => Event::Deadline,
        }
    }

    /// Writes the command and makes its exchange the pending one.
    fn begin(&mut self, exchange: Exchange) -> io::Result<()> {
        let line = exchange.command.encode();
        debug!(command = line.trim_end(), "sending");
        if let Err(err) = self.transport.write(line.as_bytes()) {
            let _ = exchange
                .reply
                .send(Err(ControlError::ChannelClosed(err.to_string())));
            return Err(err);
        }
        self.pending = Some(Pending {
            verb: exchange.command.verb(),
            expected: exchange.resyncs.and(exchange.command.argument()),
            resyncs_left: exchange.resyncs.unwrap_or(0),
            timeout: exchange.timeout,
            deadline: Instant::now() + exchange.timeout,
            reply: exchange.reply,
        });
        Ok(())
    }

    fn dispatch(&mut self, line: &str) {
        let message = match Message::decode(line) {
            Ok(message) => message,
            Err(DecodeError::Empty) => return,
            Err(err) => {
                let polling = self.pending.as_ref().map(|p| p.verb) == Some(VERB_LIGHT);
                if line.trim_start().starts_with(VERB_LIGHT) && !polling {
                    warn!(line, %err, "ignoring unreadable light reading");
                } else {
                    self.fail(ControlError::Device(err.to_string()));
                }
                return;
            }
        };
        debug!(line, "received");
        match message {
            Message::Status(level) => {
                if let Some(observer) = self.observer.as_mut() {
                    observer(level.unwrap_or(0));
                }
                if self.pending.as_ref().map(|p| p.verb) == Some(VERB_LIGHT) {
                    self.resolve(Ok(Reply {
                        verb: VERB_LIGHT,
                        payload: level,
                    }));
                }
            }
            Message::Error(code) => {
                let detail = match code {
                    Some(code) => format!("device reported error {}", code),
                    None => "device reported an error".to_string(),
                };
                self.fail(ControlError::Device(detail));
            }
            Message::Reply(reply) => self.on_reply(reply),
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        let Some(pending) = self.pending.as_mut() else {
            warn!(verb = %reply.verb, "discarding reply with no pending command");
            return;
        };
        if reply.verb != pending.verb {
            let detail = format!(
                "expected reply '{}' but received '{}'",
                pending.verb, reply.verb
            );
            self.resolve(Err(ControlError::Device(detail)));
            return;
        }
        if let (Some(expected), Some(actual)) = (pending.expected, reply.payload) {
            if expected != actual {
                if pending.resyncs_left > 0 {
                    pending.resyncs_left -= 1;
                    pending.deadline = Instant::now() + pending.timeout;
                    warn!(expected, actual, "acknowledged position mismatch, reading next reply");
                    return;
                }
                let detail = format!("acknowledged {} instead of {}", actual, expected);
                self.resolve(Err(ControlError::Device(detail)));
                return;
            }
        }
        self.resolve(Ok(reply));
    }

    /// Resolves the pending exchange with `err`, or logs it if idle.
    fn fail(&mut self, err: ControlError) {
        if self.pending.is_some() {
            self.resolve(Err(err));
        } else {
            warn!(%err, "device error with no pending command");
        }
    }

    fn resolve(&mut self, result: ControlResult<Reply>) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(result);
        }
    }

    fn expire(&mut self, now: Instant) {
        if let Some(pending) = &self.pending {
            if now >= pending.deadline {
                let verb = pending.verb;
                self.resolve(Err(ControlError::CommandTimeout { verb }));
            }
        }
    }

    /// Fails the pending and queued exchanges after a fatal channel error.
    fn shutdown(&mut self, err: io::Error) {
        error!(%err, "serial channel closed");
        let reason = err.to_string();
        self.resolve(Err(ControlError::ChannelClosed(reason.clone())));
        while let Ok(exchange) = self.requests.try_recv() {
            let _ = exchange
                .reply
                .send(Err(ControlError::ChannelClosed(reason.clone())));
        }
    }
}
