//! Line Protocol Message Types
//!
//! This module defines the messages exchanged over a managed connection.
//! Every message is one line of UTF-8 text terminated by a single `\n`.
//!
//! ## Protocol Format
//!
//! A message is a verb optionally followed by a single space and arguments:
//!
//! ```text
//! <VERB>[ <ARGS>]\n
//! ```
//!
//! The verb is matched exactly and case-sensitively:
//!
//! | Request            | Reply                 |
//! |--------------------|-----------------------|
//! | `PING <rest>`      | `PONG <rest>`         |
//! | `ECHO <rest>`      | `ECHO_REPLY <rest>`   |
//! | `DATA <rest>`      | `ACK <line length>`   |
//! | `PONG`, `ECHO_REPLY`, `ACK`, `UNKNOWN` | nothing |
//! | anything else      | `UNKNOWN <line>` or nothing, depending on policy |
//!
//! Replies are never answered, so two managed peers cannot ping-pong forever.
//!
//! ## Examples
//!
//! `PING hello\n` is answered with `PONG hello\n`.
//! `DATA abcdefghij\n` is answered with `ACK 15\n` (the line without its delimiter is 15 bytes).

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Protocol verbs.
pub mod verb {
    pub const PING: &str = "PING";
    pub const ECHO: &str = "ECHO";
    pub const DATA: &str = "DATA";
    pub const PONG: &str = "PONG";
    pub const ECHO_REPLY: &str = "ECHO_REPLY";
    pub const ACK: &str = "ACK";
    pub const UNKNOWN: &str = "UNKNOWN";
}

/// What to do with a message whose verb is not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownMessagePolicy {
    /// Answer with `UNKNOWN <original message>`.
    #[default]
    Reply,
    /// Record the message without answering.
    Silent,
}

impl FromStr for UnknownMessagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reply" => Ok(UnknownMessagePolicy::Reply),
            "silent" => Ok(UnknownMessagePolicy::Silent),
            other => Err(format!("unknown message policy '{}' (expected reply|silent)", other)),
        }
    }
}

impl fmt::Display for UnknownMessagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownMessagePolicy::Reply => write!(f, "reply"),
            UnknownMessagePolicy::Silent => write!(f, "silent"),
        }
    }
}

/// An inbound protocol message, classified once when the frame is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `PING <rest>`
    Ping(String),

    /// `ECHO <rest>`
    Echo(String),

    /// `DATA <rest>`. `size` is the byte length of the whole line on the wire.
    Data { body: String, size: usize },

    /// Any other line, kept verbatim.
    Other(String),
}

impl Message {
    /// Classifies a decoded line (delimiter already stripped).
    ///
    /// The verb is everything before the first space. A line without a space
    /// is all verb and carries empty arguments.
    ///
    /// # Example
    /// ```
    /// use pcbsim::protocol::Message;
    ///
    /// assert_eq!(Message::parse_line("PING hello"), Message::Ping("hello".into()));
    /// assert_eq!(Message::parse_line("ping hello"), Message::Other("ping hello".into()));
    /// ```
    pub fn parse_line(line: &str) -> Self {
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));

        match head {
            verb::PING => Message::Ping(rest.to_string()),
            verb::ECHO => Message::Echo(rest.to_string()),
            verb::DATA => Message::Data {
                body: rest.to_string(),
                size: line.len(),
            },
            _ => Message::Other(line.to_string()),
        }
    }

    /// Classifies a raw frame (delimiter already stripped).
    ///
    /// Invalid UTF-8 is replaced with U+FFFD. A `DATA` frame's size is taken
    /// from the raw bytes, not the decoded text.
    ///
    /// # Example
    /// ```
    /// use pcbsim::protocol::Message;
    ///
    /// let msg = Message::from_frame(b"DATA \xff");
    /// assert_eq!(msg, Message::Data { body: "\u{fffd}".into(), size: 6 });
    /// ```
    pub fn from_frame(frame: &[u8]) -> Self {
        let line = String::from_utf8_lossy(frame);
        match Self::parse_line(&line) {
            Message::Data { body, .. } => Message::Data {
                body,
                size: frame.len(),
            },
            other => other,
        }
    }

    /// Returns true if this line is itself a reply (`PONG`, `ECHO_REPLY`,
    /// `ACK` or `UNKNOWN`).
    pub fn is_reply(&self) -> bool {
        matches!(self, Message::Other(_))
            && matches!(
                self.verb(),
                verb::PONG | verb::ECHO_REPLY | verb::ACK | verb::UNKNOWN
            )
    }

    /// Returns the reply this message calls for, if any.
    ///
    /// Replies from the peer are recorded but never answered.
    pub fn reply(&self, policy: UnknownMessagePolicy) -> Option<Reply> {
        match self {
            Message::Ping(rest) => Some(Reply::Pong(rest.clone())),
            Message::Echo(rest) => Some(Reply::EchoReply(rest.clone())),
            Message::Data { size, .. } => Some(Reply::Ack(*size)),
            Message::Other(_) if self.is_reply() => None,
            Message::Other(line) => match policy {
                UnknownMessagePolicy::Reply => Some(Reply::Unknown(line.clone())),
                UnknownMessagePolicy::Silent => None,
            },
        }
    }

    /// Returns the verb of this message (the whole line for `Other`).
    pub fn verb(&self) -> &str {
        match self {
            Message::Ping(_) => verb::PING,
            Message::Echo(_) => verb::ECHO,
            Message::Data { .. } => verb::DATA,
            Message::Other(line) => line.split_once(' ').map_or(line.as_str(), |(v, _)| v),
        }
    }

    /// Encodes this message as a delimited frame.
    pub fn encode(&self) -> Bytes {
        encode_line(&self.to_string())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, rest) = match self {
            Message::Ping(rest) => (verb::PING, rest),
            Message::Echo(rest) => (verb::ECHO, rest),
            Message::Data { body, .. } => (verb::DATA, body),
            Message::Other(line) => return write!(f, "{}", line),
        };

        // A bare verb has no trailing space
        if rest.is_empty() {
            write!(f, "{}", head)
        } else {
            write!(f, "{} {}", head, rest)
        }
    }
}

/// An outbound reply produced by the message handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `PONG <rest>`
    Pong(String),
    /// `ECHO_REPLY <rest>`
    EchoReply(String),
    /// `ACK <n>`
    Ack(usize),
    /// `UNKNOWN <line>`
    Unknown(String),
}

impl Reply {
    /// Encodes the reply as a delimited frame ready to be sent.
    ///
    /// # Example
    /// ```
    /// use pcbsim::protocol::Reply;
    ///
    /// assert_eq!(&Reply::Ack(15).encode()[..], b"ACK 15\n");
    /// ```
    pub fn encode(&self) -> Bytes {
        encode_line(&self.to_string())
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Pong(rest) => write!(f, "{} {}", verb::PONG, rest),
            Reply::EchoReply(rest) => write!(f, "{} {}", verb::ECHO_REPLY, rest),
            Reply::Ack(n) => write!(f, "{} {}", verb::ACK, n),
            Reply::Unknown(line) => write!(f, "{} {}", verb::UNKNOWN, line),
        }
    }
}

/// Appends the delimiter to `text` and returns the frame.
pub fn encode_line(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(DELIMITER);
    buf.freeze()
}
