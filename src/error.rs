/*
 * @file error.rs
 * @brief Control layer error taxonomy
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

//! Failure taxonomy for the serial control layer.

use thiserror::Error;

/// Errors surfaced by the protocol engine and the command facade.
///
/// # Details
/// Timeouts and device errors are ordinary, recoverable outcomes of an
/// exchange. Only [`ControlError::ChannelClosed`] means the link is gone and
/// the worker has stopped.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No reply with the expected verb arrived within the exchange window.
    #[error("command '{verb}' timed out waiting for a reply")]
    CommandTimeout { verb: char },

    /// The device answered with its error verb, an out-of-sequence reply,
    /// or a line that could not be decoded.
    #[error("device error: {0}")]
    Device(String),

    /// A move was not acknowledged in time; a stop has already been issued.
    #[error("mechanical fault while moving to {target}")]
    MechanicalFault { target: i32 },

    /// The serial channel failed or the worker is no longer running.
    #[error("serial channel closed: {0}")]
    ChannelClosed(String),
}

/// Convenience alias used across the control modules.
pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let timeout = ControlError::CommandTimeout { verb: 'M' };
        assert_eq!(
            timeout.to_string(),
            "command 'M' timed out waiting for a reply"
        );
        let fault = ControlError::MechanicalFault { target: 300 };
        assert!(fault.to_string().contains("300"));
    }

    #[test]
    fn converts_into_anyhow() {
        fn fails() -> anyhow::Result<()> {
            let result: ControlResult<()> = Err(ControlError::ChannelClosed("unplugged".into()));
            result?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(err.downcast_ref::<ControlError>().is_some());
    }
}
