//! Line Protocol Implementation
//!
//! This module implements the tiny request/response protocol spoken over a
//! managed connection.
//!
//! ## Overview
//!
//! Every message is one line of UTF-8 text terminated by `\n`. The first
//! token decides how the message is answered (`PING`, `ECHO`, `DATA`), and
//! everything else falls under the configured [`UnknownMessagePolicy`].
//!
//! ## Modules
//!
//! - `types`: Defines the `Message` and `Reply` enums and frame encoding
//! - `parser`: Incremental parser that splits a byte buffer into frames
//!
//! ## Example
//!
//! ```
//! use pcbsim::protocol::{LineParser, Message, UnknownMessagePolicy};
//!
//! let parser = LineParser::default();
//! let (msg, _consumed) = parser.parse(b"ECHO hi\n").unwrap().unwrap();
//! let reply = msg.reply(UnknownMessagePolicy::Reply).unwrap();
//! assert_eq!(&reply.encode()[..], b"ECHO_REPLY hi\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{find_delimiter, FrameError, LineParser, ParseResult, DEFAULT_MAX_FRAME_LENGTH};
pub use types::{encode_line, Message, Reply, UnknownMessagePolicy, DELIMITER};
