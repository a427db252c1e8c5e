//! Incremental Line Frame Parser
//!
//! Frames are delimited by a single `\n`. The parser never blocks on missing
//! data and never fails on bad encoding:
//!
//! - `Ok(Some((message, consumed)))` - a complete frame was parsed, `consumed`
//!   bytes (frame plus delimiter) can be dropped from the buffer
//! - `Ok(None)` - no delimiter yet, keep the bytes and wait for more
//! - `Err(FrameError::TooLong { .. })` - the frame exceeds the configured limit
//!
//! Invalid UTF-8 is replaced with U+FFFD so a bad byte never stalls the stream.

use crate::protocol::types::{Message, DELIMITER};
use thiserror::Error;

/// Default maximum frame length (64 KB), excluding the delimiter.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is longer than the configured maximum.
    ///
    /// `terminated` tells whether the delimiter was already seen. An
    /// unterminated oversize frame keeps going until the next delimiter.
    #[error("frame too long: {size} bytes (max: {max})")]
    TooLong {
        size: usize,
        max: usize,
        terminated: bool,
    },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, FrameError>;

/// A parser for newline-delimited frames.
#[derive(Debug, Clone, Copy)]
pub struct LineParser {
    max_frame_length: usize,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LineParser {
    /// Creates a parser that rejects frames longer than `max_frame_length`.
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    /// Returns the configured frame length limit.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Attempts to parse one frame from the front of `buf`.
    ///
    /// # Example
    ///
    /// ```
    /// use pcbsim::protocol::{LineParser, Message};
    ///
    /// let parser = LineParser::default();
    /// let (msg, consumed) = parser.parse(b"PING hello\nECHO").unwrap().unwrap();
    /// assert_eq!(msg, Message::Ping("hello".into()));
    /// assert_eq!(consumed, 11);
    /// ```
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
        match find_delimiter(buf) {
            Some(end) if end > self.max_frame_length => Err(FrameError::TooLong {
                size: end,
                max: self.max_frame_length,
                terminated: true,
            }),
            Some(end) => Ok(Some((Message::from_frame(&buf[..end]), end + 1))),
            None if buf.len() > self.max_frame_length => Err(FrameError::TooLong {
                size: buf.len(),
                max: self.max_frame_length,
                terminated: false,
            }),
            None => Ok(None),
        }
    }
}

/// Returns the position of the first delimiter in `buf`.
pub fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_frame() {
        let parser = LineParser::default();
        let (msg, consumed) = parser.parse(b"DATA abcdefghij\n").unwrap().unwrap();
        assert_eq!(
            msg,
            Message::Data {
                body: "abcdefghij".into(),
                size: 15
            }
        );
        assert_eq!(consumed, 16);
    }

    #[test]
    fn test_parse_incomplete() {
        let parser = LineParser::default();
        assert_eq!(parser.parse(b"PING hel").unwrap(), None);
        assert_eq!(parser.parse(b"").unwrap(), None);
    }

    #[test]
    fn test_parse_only_first_frame() {
        let parser = LineParser::default();
        let (msg, consumed) = parser.parse(b"PING a\nPING b\n").unwrap().unwrap();
        assert_eq!(msg, Message::Ping("a".into()));
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_empty_line() {
        let parser = LineParser::default();
        let (msg, consumed) = parser.parse(b"\n").unwrap().unwrap();
        assert_eq!(msg, Message::Other(String::new()));
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let parser = LineParser::default();
        let (msg, consumed) = parser.parse(b"ECHO a\xffb\n").unwrap().unwrap();
        assert_eq!(msg, Message::Echo("a\u{fffd}b".into()));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_invalid_utf8_data_size() {
        let parser = LineParser::default();
        let (msg, consumed) = parser.parse(b"DATA \xff\n").unwrap().unwrap();
        assert_eq!(
            msg,
            Message::Data {
                body: "\u{fffd}".into(),
                size: 6
            }
        );
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_too_long_terminated() {
        let parser = LineParser::new(4);
        assert_eq!(
            parser.parse(b"DATA x\nPING\n"),
            Err(FrameError::TooLong {
                size: 6,
                max: 4,
                terminated: true
            })
        );
    }

    #[test]
    fn test_too_long_unterminated() {
        let parser = LineParser::new(4);
        assert_eq!(
            parser.parse(b"ABCDEFG"),
            Err(FrameError::TooLong {
                size: 7,
                max: 4,
                terminated: false
            })
        );
        // Exactly at the limit is still fine
        assert_eq!(parser.parse(b"ABCD").unwrap(), None);
        assert!(parser.parse(b"ABCD\n").unwrap().is_some());
    }
}
