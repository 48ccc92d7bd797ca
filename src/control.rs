/*
 * @file control.rs
 * @brief Command facade and posture arithmetic
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

//! Typed motion and sensor commands for the toy.

use tracing::{debug, warn};

use crate::config::ControlConfig;
use crate::engine::{Engine, LightObserver};
use crate::error::{ControlError, ControlResult};
use crate::protocol::Command;
use crate::transport::Transport;

/// Named position on the toy's single motor scale.
///
/// # Details
/// The firmware maps every gesture onto one cam position between 0 and 350.
/// Intermediate positions are reached with [`Posture::lerp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posture(pub i32);

impl Posture {
    pub const EARS_UP: Posture = Posture(0);
    pub const EARS_UP_MOUTH_OPEN: Posture = Posture(50);
    pub const EYES_CLOSED: Posture = Posture(130);
    pub const EARS_DOWN_EYES_CLOSED: Posture = Posture(180);
    pub const EARS_DOWN: Posture = Posture(300);
    pub const EARS_DOWN_MOUTH_OPEN: Posture = Posture(350);

    /// Raw motor position.
    pub fn position(self) -> i32 {
        self.0
    }

    /// Linear blend from `from` (`t = 0`) to `to` (`t = 1`).
    ///
    /// # Details
    /// `t` is clamped to `[0, 1]` and the result rounded to the nearest
    /// position, so the output always lies between the two postures.
    ///
    /// # Arguments
    /// * `from` - Posture at `t = 0`.
    /// * `to` - Posture at `t = 1`.
    /// * `t` - Blend factor, typically a normalized speech volume.
    ///
    /// # Returns
    /// * `Posture` - The interpolated position.
    pub fn lerp(from: Posture, to: Posture, t: f32) -> Posture {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let span = (to.0 - from.0) as f32;
        Posture(from.0 + (span * t).round() as i32)
    }
}

/// Command facade over the protocol engine.
///
/// # Details
/// Every method blocks until its exchange resolves or times out. Calls are
/// serialized by the engine, so at most one command is ever in flight.
pub struct Control {
    engine: Engine,
    config: ControlConfig,
}

impl Control {
    /// Starts the protocol engine on `transport`.
    ///
    /// # Arguments
    /// * `transport` - Channel handed to the engine's worker.
    /// * `config` - Timeouts and resync policy.
    /// * `on_light` - Optional observer for unsolicited light readings.
    ///
    /// # Errors
    /// Returns [`ControlError::ChannelClosed`] if the worker cannot start.
    pub fn start<T>(
        transport: T,
        config: ControlConfig,
        on_light: Option<LightObserver>,
    ) -> ControlResult<Self>
    where
        T: Transport + 'static,
    {
        let engine = Engine::spawn(transport, on_light)?;
        Ok(Self { engine, config })
    }

    /// Runs the homing sequence.
    ///
    /// # Errors
    /// Any exchange failure is returned unchanged.
    pub fn home(&self) -> ControlResult<()> {
        self.engine
            .send_and_await(Command::home(), self.config.command_timeout())?;
        Ok(())
    }

    /// Moves the motor to `target` and waits for the acknowledgement.
    ///
    /// # Details
    /// Waits up to the move timeout. If the device stays silent the motor is
    /// assumed stuck: a stop is sent (its outcome ignored) and the call fails
    /// with [`ControlError::MechanicalFault`]. An acknowledgement echoing an
    /// older position is skipped, up to the configured number of resyncs.
    ///
    /// # Arguments
    /// * `target` - Absolute motor position.
    ///
    /// # Returns
    /// * `Ok(Some(position))` - Position echoed by the firmware.
    /// * `Ok(None)` - Acknowledged without a position.
    ///
    /// # Errors
    /// * [`ControlError::MechanicalFault`] on timeout.
    /// * [`ControlError::Device`] on error replies or unresolved desync.
    /// * [`ControlError::ChannelClosed`] if the link is gone.
    pub fn move_to(&self, target: i32) -> ControlResult<Option<i32>> {
        let result = self.engine.send_and_confirm(
            Command::move_to(target),
            self.config.move_timeout(),
            self.config.move_resync_attempts,
        );
        match result {
            Ok(reply) => Ok(reply.payload),
            Err(ControlError::CommandTimeout { .. }) => {
                warn!(target, "move timed out, stopping motor");
                if let Err(err) = self.stop() {
                    debug!(%err, "compensating stop failed");
                }
                Err(ControlError::MechanicalFault { target })
            }
            Err(err) => Err(err),
        }
    }

    /// Moves to a named posture.
    pub fn pose(&self, posture: Posture) -> ControlResult<Option<i32>> {
        self.move_to(posture.position())
    }

    /// Stops the motor.
    ///
    /// # Details
    /// A timeout is logged and swallowed: stop is the recovery action of last
    /// resort and has nothing further to fall back on.
    ///
    /// # Errors
    /// Device errors and a closed channel are still returned.
    pub fn stop(&self) -> ControlResult<()> {
        match self
            .engine
            .send_and_await(Command::stop(), self.config.command_timeout())
        {
            Ok(_) => Ok(()),
            Err(ControlError::CommandTimeout { .. }) => {
                warn!("stop was not acknowledged");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Polls the light sensor.
    ///
    /// # Returns
    /// * `Ok(level)` - The reading, or 0 when the reply carries none.
    pub fn light(&self) -> ControlResult<i32> {
        let reply = self
            .engine
            .send_and_await(Command::light(), self.config.command_timeout())?;
        Ok(reply.payload.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;

    fn fast_config() -> ControlConfig {
        ControlConfig {
            command_timeout_ms: 100,
            move_timeout_ms: 100,
            move_resync_attempts: 2,
        }
    }

    #[test]
    fn lerp_blends_between_postures() {
        let closed = Posture::EARS_UP;
        let open = Posture::EARS_UP_MOUTH_OPEN;
        assert_eq!(Posture::lerp(closed, open, 0.0), closed);
        assert_eq!(Posture::lerp(closed, open, 1.0), open);
        assert_eq!(Posture::lerp(closed, open, 0.5), Posture(25));
        assert_eq!(Posture::lerp(open, closed, 0.2), Posture(40));
    }

    #[test]
    fn lerp_clamps_out_of_range_factors() {
        let closed = Posture::EARS_UP;
        let open = Posture::EARS_UP_MOUTH_OPEN;
        assert_eq!(Posture::lerp(closed, open, 3.0), open);
        assert_eq!(Posture::lerp(closed, open, -1.0), closed);
        assert_eq!(Posture::lerp(closed, open, f32::NAN), closed);
    }

    #[test]
    fn acknowledged_move_writes_once() {
        let (transport, handle) = ScriptedTransport::echo();
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert_eq!(control.move_to(130).unwrap(), Some(130));
        assert_eq!(handle.writes(), vec!["M 130"]);
    }

    #[test]
    fn silent_move_stops_once_and_faults() {
        let (transport, handle) = ScriptedTransport::silent();
        let control = Control::start(transport, fast_config(), None).unwrap();
        let err = control.move_to(300).unwrap_err();
        assert!(matches!(err, ControlError::MechanicalFault { target: 300 }));
        assert_eq!(handle.writes(), vec!["M 300", "S"]);
    }

    #[test]
    fn stop_failure_does_not_mask_fault() {
        let (transport, _handle) = ScriptedTransport::new(|line| {
            if line == "S" {
                vec!["E".to_string()]
            } else {
                Vec::new()
            }
        });
        let control = Control::start(transport, fast_config(), None).unwrap();
        let err = control.move_to(300).unwrap_err();
        assert!(matches!(err, ControlError::MechanicalFault { .. }));
    }

    #[test]
    fn stop_swallows_timeout() {
        let (transport, _handle) = ScriptedTransport::silent();
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert!(control.stop().is_ok());
    }

    #[test]
    fn light_normalizes_missing_payload() {
        let (transport, _handle) = ScriptedTransport::new(|_| vec!["L".to_string()]);
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert_eq!(control.light().unwrap(), 0);

        let (transport, _handle) = ScriptedTransport::new(|_| vec!["L 42".to_string()]);
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert_eq!(control.light().unwrap(), 42);
    }

    #[test]
    fn home_propagates_device_error() {
        let (transport, _handle) = ScriptedTransport::new(|_| vec!["E".to_string()]);
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert!(matches!(control.home(), Err(ControlError::Device(_))));
    }

    #[test]
    fn home_propagates_timeout() {
        let (transport, _handle) = ScriptedTransport::silent();
        let control = Control::start(transport, fast_config(), None).unwrap();
        assert!(matches!(
            control.home(),
            Err(ControlError::CommandTimeout { verb: 'H' })
        ));
    }
}
