/*
 * @file lib.rs
 * @brief Furby library root
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

//! Furby - serial control and speech-synchronised motion for an animatronic toy.
//!
//! This library drives the toy's single-motor firmware over a line-based
//! serial protocol and moves its jaw in time with synthesized speech:
//! - [`engine`] owns the serial channel on a dedicated worker thread
//! - [`control`] exposes home/move/stop/light with timeout recovery
//! - [`speech`] renders text with `espeak-ng` and computes a loudness envelope
//! - [`furby`] combines both into say/wakeup/sleep behaviours
//!
//! # Example
//! ```no_run
//! use std::path::Path;
//!
//! use anyhow::Result;
//! use furby::config::{load_app_config, CONFIG_PATH};
//! use furby::furby::Furby;
//! use furby::speech::Speech;
//! use furby::transport::SerialTransport;
//!
//! fn main() -> Result<()> {
//!     let config = load_app_config(Path::new(CONFIG_PATH));
//!     let transport = SerialTransport::open(
//!         &config.serial.port,
//!         config.serial.baud,
//!         config.serial.read_timeout(),
//!     )?;
//!     let speech = Speech::from_config(&config.speech);
//!     let mut furby = Furby::new(transport, &config, speech)?;
//!     furby.say("Bonjour !")?;
//!     furby.sleep()
//! }
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod furby;
pub mod protocol;
pub mod speech;
pub mod transport;

pub use control::{Control, Posture};
pub use error::{ControlError, ControlResult};
