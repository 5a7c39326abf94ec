//! Line framing for the telechat socket protocol.
//!
//! Telnet clients differ in how they send input: some deliver the whole line
//! when return is pressed, others send every keystroke as its own segment.
//! Incoming bytes are therefore accumulated in a buffer and a line is only
//! produced once its `\n` terminator has arrived.

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Default maximum line length in bytes (terminator excluded).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Terminator written after every server line.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Marker that ends every prompt.
pub const PROMPT_MARKER: &str = "#: ";

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line exceeds the configured maximum. The offending bytes are dropped.
    #[error("Line of {0} bytes exceeds maximum {1}")]
    LineTooLong(usize, usize),
}

/// Strip any leading or trailing `\r` / `\n` characters.
#[must_use]
pub fn trim_terminators(line: &str) -> &str {
    line.trim_matches(|c| c == '\r' || c == '\n')
}

/// The prompt shown after every handled line.
#[must_use]
pub fn prompt(name: &str) -> String {
    format!("{LINE_TERMINATOR}{name}{PROMPT_MARKER}")
}

/// A delivered chat line followed by the recipient's prompt.
#[must_use]
pub fn delivery(text: &str, recipient: &str) -> String {
    format!("{LINE_TERMINATOR}{text}{}", prompt(recipient))
}

/// Stateful line codec bound to a length limit.
///
/// Once a line overflows the limit, everything up to and including its
/// eventual `\n` is dropped, however many reads it spans.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    discarding: bool,
}

impl LineCodec {
    /// Create a codec with the given maximum line length.
    #[must_use]
    pub fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            discarding: false,
        }
    }

    /// Maximum accepted line length.
    #[must_use]
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Whether the codec is dropping the rest of an oversized line.
    #[must_use]
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Try to take one complete line from the buffer.
    ///
    /// Returns `Ok(Some(line))` with the terminator trimmed when a `\n` is
    /// buffered, `Ok(None)` if more data is needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LineTooLong`] once per oversized line. The
    /// buffer is advanced past the oversized data so the session can keep
    /// reading.
    pub fn decode_from(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ProtocolError> {
        if self.discarding {
            let Some(pos) = find_newline(buf) else {
                buf.clear();
                return Ok(None);
            };
            buf.advance(pos + 1);
            self.discarding = false;
        }

        let Some(pos) = find_newline(buf) else {
            if buf.len() > self.max_line_length {
                let len = buf.len();
                buf.clear();
                self.discarding = true;
                return Err(ProtocolError::LineTooLong(len, self.max_line_length));
            }
            return Ok(None);
        };

        if pos > self.max_line_length {
            buf.advance(pos + 1);
            return Err(ProtocolError::LineTooLong(pos, self.max_line_length));
        }

        let raw = buf.split_to(pos + 1);
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(trim_terminators(&line).to_string()))
    }
}

fn find_newline(buf: &BytesMut) -> Option<usize> {
    buf.iter().position(|b| *b == b'\n')
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}
