/*
 * @file furby.rs
 * @brief Say, wakeup and sleep behaviours
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

//! Behaviours built on the control facade and the speech envelope.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel::{self, Receiver, TrySendError};
use tracing::{debug, info};

use crate::config::{AppConfig, BehaviorConfig};
use crate::control::{Control, Posture};
use crate::engine::LightObserver;
use crate::speech::Speech;
use crate::transport::Transport;

/// Jaw fully shut.
pub const MOUTH_CLOSED: Posture = Posture::EARS_UP;

/// Jaw fully open.
pub const MOUTH_OPEN: Posture = Posture::EARS_UP_MOUTH_OPEN;

/// Remaining playback below which the jaw stops tracking the envelope.
const JAW_TAIL: Duration = Duration::from_millis(100);

/// Light readings kept for [`Furby::light_events`]; older ones are dropped.
pub const LIGHT_QUEUE: usize = 64;

/// The toy: motion, voice and an awake flag.
pub struct Furby {
    control: Control,
    speech: Speech,
    behavior: BehaviorConfig,
    awake: bool,
    lights: Receiver<i32>,
}

impl Furby {
    /// Starts the control engine on `transport` and wires up `speech`.
    ///
    /// # Details
    /// Light readings pushed by the device are forwarded to the channel
    /// returned by [`Furby::light_events`]. The channel holds at most
    /// [`LIGHT_QUEUE`] readings; when nobody drains it the oldest reading
    /// makes room for the newest. The toy starts asleep.
    ///
    /// # Errors
    /// Returns an error if the control worker cannot be started.
    pub fn new<T>(transport: T, config: &AppConfig, speech: Speech) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let (forward, lights) = channel::bounded(LIGHT_QUEUE);
        let backlog = lights.clone();
        let on_light: LightObserver = Box::new(move |level| {
            debug!(level, "light");
            if let Err(TrySendError::Full(level)) = forward.try_send(level) {
                debug!("light queue full, dropping oldest reading");
                let _ = backlog.try_recv();
                let _ = forward.try_send(level);
            }
        });
        let control = Control::start(transport, config.control.clone(), Some(on_light))?;
        Ok(Self {
            control,
            speech,
            behavior: config.behavior.clone(),
            awake: false,
            lights,
        })
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// The most recent light readings pushed by the device, in arrival order.
    pub fn light_events(&self) -> Receiver<i32> {
        self.lights.clone()
    }

    /// Speaks `text` while moving the jaw with the voice's loudness.
    ///
    /// # Details
    /// Wakes the toy first if needed. Every tick the jaw is set between
    /// closed and open according to the envelope slightly ahead of the
    /// playback clock. Once playback is nearly over the jaw closes, the call
    /// waits for the audio to end and pauses briefly before returning.
    ///
    /// # Errors
    /// Motion and speech failures are returned as they occur.
    pub fn say(&mut self, text: &str) -> Result<()> {
        if !self.awake {
            self.wakeup()?;
        }
        self.control.pose(MOUTH_CLOSED)?;
        self.speech.say(text)?;
        let lookahead = self.behavior.lookahead();
        while self.speech.left() > JAW_TAIL {
            let t = self.speech.volume(lookahead);
            self.control.pose(Posture::lerp(MOUTH_CLOSED, MOUTH_OPEN, t))?;
            thread::sleep(self.behavior.tick());
        }
        self.control.pose(MOUTH_CLOSED)?;
        self.speech.wait()?;
        thread::sleep(self.behavior.debounce());
        Ok(())
    }

    /// Opens the eyes and raises the ears; no-op when already awake.
    pub fn wakeup(&mut self) -> Result<()> {
        if self.awake {
            return Ok(());
        }
        info!("waking up");
        self.gesture(&[Posture::EYES_CLOSED, Posture::EARS_UP])?;
        self.awake = true;
        Ok(())
    }

    /// Closes the eyes and lowers the ears; no-op when already asleep.
    pub fn sleep(&mut self) -> Result<()> {
        if !self.awake {
            return Ok(());
        }
        info!("going to sleep");
        self.gesture(&[Posture::EYES_CLOSED, Posture::EARS_DOWN_EYES_CLOSED])?;
        self.awake = false;
        Ok(())
    }

    fn gesture(&self, postures: &[Posture]) -> Result<()> {
        for &posture in postures {
            self.control.pose(posture)?;
            thread::sleep(self.behavior.settle());
        }
        Ok(())
    }
}
