/*
 * @file protocol.rs
 * @brief Line protocol codec for the Furby firmware
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

//! Wire codec for the Furby line protocol.
//!
//! Outbound commands are `<verb>[ <int>]\n`. Inbound lines are
//! `<verb><optional int>` and are decoded once, at the boundary, into a
//! [`Message`] so the engine can dispatch with a plain `match`.

use thiserror::Error;

/// Move the motor to an absolute position.
pub const VERB_MOVE: char = 'M';

/// Run the homing sequence.
pub const VERB_HOME: char = 'H';

/// Stop the motor immediately.
pub const VERB_STOP: char = 'S';

/// Poll the light sensor; also the verb of unsolicited light readings.
pub const VERB_LIGHT: char = 'L';

/// Device-side error report.
pub const VERB_ERROR: char = 'E';

/// Single outbound command.
///
/// # Details
/// Immutable once built. Use the constructors rather than raw verbs so the
/// verb/argument pairing always matches the firmware's command set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    verb: char,
    argument: Option<i32>,
}

impl Command {
    /// `H`
    pub fn home() -> Self {
        Self::new(VERB_HOME, None)
    }

    /// `S`
    pub fn stop() -> Self {
        Self::new(VERB_STOP, None)
    }

    /// `L`
    pub fn light() -> Self {
        Self::new(VERB_LIGHT, None)
    }

    /// `M <target>`
    pub fn move_to(target: i32) -> Self {
        Self::new(VERB_MOVE, Some(target))
    }

    fn new(verb: char, argument: Option<i32>) -> Self {
        Self { verb, argument }
    }

    /// Verb the matching reply must carry.
    pub fn verb(&self) -> char {
        self.verb
    }

    /// Integer argument, if the command takes one.
    pub fn argument(&self) -> Option<i32> {
        self.argument
    }

    /// Serializes the command as a newline-terminated ASCII line.
    ///
    /// # Returns
    /// * `String` - e.g. `"M 130\n"` or `"H\n"`.
    pub fn encode(&self) -> String {
        match self.argument {
            Some(arg) => format!("{} {}\n", self.verb, arg),
            None => format!("{}\n", self.verb),
        }
    }
}

/// Reply correlated to a command by verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reply {
    pub verb: char,
    pub payload: Option<i32>,
}

/// Decoded inbound line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Message {
    /// Acknowledgement for a command verb.
    Reply(Reply),
    /// Light reading; pushed by the device on its own schedule or in answer
    /// to an `L` poll.
    Status(Option<i32>),
    /// Device reported an error.
    Error(Option<i32>),
}

/// Reasons an inbound line cannot be decoded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("invalid payload in reply {line:?}")]
    BadPayload { line: String },
}

impl Message {
    /// Decodes one line received from the device.
    ///
    /// # Details
    /// The first character is the verb. The rest, trimmed, is an optional
    /// signed integer payload.
    ///
    /// # Arguments
    /// * `line` - Raw line, with or without its terminator.
    ///
    /// # Returns
    /// * `Ok(Message)` - Tagged message ready for dispatch.
    ///
    /// # Errors
    /// * [`DecodeError::Empty`] for blank lines.
    /// * [`DecodeError::BadPayload`] when the payload is not an integer.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim();
        let mut chars = line.chars();
        let verb = chars.next().ok_or(DecodeError::Empty)?;
        let rest = chars.as_str().trim();
        let payload = if rest.is_empty() {
            None
        } else {
            Some(rest.parse::<i32>().map_err(|_| DecodeError::BadPayload {
                line: line.to_string(),
            })?)
        };
        Ok(match verb {
            VERB_LIGHT => Message::Status(payload),
            VERB_ERROR => Message::Error(payload),
            _ => Message::Reply(Reply { verb, payload }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_and_without_argument() {
        assert_eq!(Command::move_to(130).encode(), "M 130\n");
        assert_eq!(Command::move_to(-5).encode(), "M -5\n");
        assert_eq!(Command::home().encode(), "H\n");
        assert_eq!(Command::stop().encode(), "S\n");
        assert_eq!(Command::light().encode(), "L\n");
    }

    #[test]
    fn decodes_acknowledgement_with_payload() {
        assert_eq!(
            Message::decode("M130\r\n"),
            Ok(Message::Reply(Reply {
                verb: 'M',
                payload: Some(130)
            }))
        );
        assert_eq!(
            Message::decode("M 42"),
            Ok(Message::Reply(Reply {
                verb: 'M',
                payload: Some(42)
            }))
        );
    }

    #[test]
    fn decodes_bare_acknowledgement() {
        assert_eq!(
            Message::decode("H"),
            Ok(Message::Reply(Reply {
                verb: 'H',
                payload: None
            }))
        );
    }

    #[test]
    fn light_and_error_lines_are_tagged() {
        assert_eq!(Message::decode("L42"), Ok(Message::Status(Some(42))));
        assert_eq!(Message::decode("L"), Ok(Message::Status(None)));
        assert_eq!(Message::decode("E-1"), Ok(Message::Error(Some(-1))));
    }

    #[test]
    fn rejects_blank_and_garbage() {
        assert_eq!(Message::decode("  \n"), Err(DecodeError::Empty));
        assert!(matches!(
            Message::decode("Mabc"),
            Err(DecodeError::BadPayload { .. })
        ));
    }
}
