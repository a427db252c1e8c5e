//! Message Handler
//!
//! This module interprets the line protocol for one connection and keeps its
//! traffic accounting. Each managed connection owns one [`MessageHandler`],
//! which works on that connection's [`ConnectionRecord`].
//!
//! ## Receive Path
//!
//! ```text
//! receive(bytes)
//!      │
//!      ▼
//! ┌──────────────────────────┐
//! │ count bytes / packets    │
//! │ append to receive buffer │
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐     no delimiter yet
//! │ parse next frame         │───────────────────────> keep buffered
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │ record in inbox          │
//! │ send reply (if any)      │──> outbox
//! └────────────┬─────────────┘
//!              │
//!         [Loop back]
//! ```
//!
//! ## Buffer Management
//!
//! The byte stream carries no packet boundaries that matter to the protocol:
//! one `receive` call may hold several frames, or a frame may arrive across
//! many calls. The receive buffer keeps any trailing partial frame until its
//! delimiter shows up, so frames are never lost, duplicated or reordered.
//!
//! A frame that grows past the configured limit is dropped up to its
//! delimiter and counted in [`MessageHandler::frames_dropped`].

use crate::connection::latency::{DelayKind, Latency};
use crate::connection::record::{ConnectionConfig, ConnectionError, ConnectionRecord};
use crate::protocol::{find_delimiter, FrameError, LineParser, Message, UnknownMessagePolicy};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{trace, warn};

/// Protocol state of one connection.
#[derive(Debug)]
pub struct MessageHandler {
    /// Bytes received but not yet parsed
    buffer: BytesMut,

    /// Frame parser
    parser: LineParser,

    /// What to do with unrecognized verbs
    policy: UnknownMessagePolicy,

    /// Simulated transmission latency
    latency: Arc<dyn Latency>,

    /// Messages dispatched, oldest first
    inbox: VecDeque<Message>,

    /// Frames transmitted, oldest first
    outbox: VecDeque<Bytes>,

    /// Skipping the tail of an oversize frame
    discarding: bool,

    /// Oversize frames thrown away
    frames_dropped: u64,
}

impl MessageHandler {
    /// Creates a handler with the given settings and latency strategy.
    pub fn new(config: &ConnectionConfig, latency: Arc<dyn Latency>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.buffer_size),
            parser: LineParser::new(config.max_frame_length),
            policy: config.unknown_message_policy,
            latency,
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            discarding: false,
            frames_dropped: 0,
        }
    }

    /// Returns true if `record` may carry data.
    #[inline]
    pub fn can_send(&self, record: &ConnectionRecord) -> bool {
        record.state().can_transfer()
    }

    /// Transmits `payload`, returning `false` without side effects if the
    /// connection is not established.
    pub fn send(&mut self, record: &mut ConnectionRecord, payload: Bytes) -> bool {
        self.try_send(record, payload).is_ok()
    }

    /// Like [`send`](Self::send) but reports why a send was refused.
    pub fn try_send(
        &mut self,
        record: &mut ConnectionRecord,
        payload: Bytes,
    ) -> Result<(), ConnectionError> {
        if !self.can_send(record) {
            return Err(ConnectionError::NotEstablished {
                id: record.id(),
                state: record.state(),
            });
        }

        let len = payload.len();
        record.bytes_sent += len as u64;
        record.packets_sent += 1;
        record.sequence_number = record.sequence_number.wrapping_add(len as u32);
        record.touch();

        self.latency.pause(DelayKind::Transmit);

        trace!(conn = %record.id(), bytes = len, seq = record.sequence_number, "Sent frame");
        self.outbox.push_back(payload);
        Ok(())
    }

    /// Accepts inbound bytes and dispatches every complete frame.
    ///
    /// Does nothing unless the connection is established. Returns the number
    /// of messages dispatched.
    pub fn receive(&mut self, record: &mut ConnectionRecord, data: &[u8]) -> usize {
        if !self.can_send(record) {
            trace!(conn = %record.id(), state = %record.state(), "Dropping data for unestablished connection");
            return 0;
        }

        record.bytes_received += data.len() as u64;
        record.packets_received += 1;
        record.touch();

        self.buffer.extend_from_slice(data);
        trace!(
            conn = %record.id(),
            bytes = data.len(),
            buffered = self.buffer.len(),
            "Received data"
        );

        let mut dispatched = 0;
        while let Some(message) = self.next_message(record) {
            self.dispatch(record, message);
            dispatched += 1;
        }
        dispatched
    }

    /// Pulls the next complete message out of the receive buffer.
    fn next_message(&mut self, record: &ConnectionRecord) -> Option<Message> {
        loop {
            if self.discarding {
                match find_delimiter(&self.buffer) {
                    Some(end) => {
                        self.buffer.advance(end + 1);
                        self.discarding = false;
                    }
                    None => {
                        self.buffer.clear();
                        return None;
                    }
                }
            }

            match self.parser.parse(&self.buffer) {
                Ok(Some((message, consumed))) => {
                    self.buffer.advance(consumed);
                    return Some(message);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(conn = %record.id(), error = %e, "Dropping oversize frame");
                    let FrameError::TooLong {
                        size, terminated, ..
                    } = e;
                    self.frames_dropped += 1;
                    if terminated {
                        self.buffer.advance(size + 1);
                    } else {
                        self.buffer.clear();
                        self.discarding = true;
                        return None;
                    }
                }
            }
        }
    }

    /// Answers one message and records it in the inbox.
    fn dispatch(&mut self, record: &mut ConnectionRecord, message: Message) {
        trace!(conn = %record.id(), verb = message.verb(), "Dispatching message");

        if let Some(reply) = message.reply(self.policy) {
            self.send(record, reply.encode());
        }
        self.inbox.push_back(message);
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Oversize frames thrown away so far.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Number of transmitted frames not yet drained.
    pub fn pending_outbound(&self) -> usize {
        self.outbox.len()
    }

    /// Number of dispatched messages not yet drained.
    pub fn pending_inbound(&self) -> usize {
        self.inbox.len()
    }

    /// Takes every transmitted frame, oldest first.
    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox).into()
    }

    /// Takes every dispatched message, oldest first.
    pub fn drain_inbound(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.inbox).into()
    }

    /// Frees the receive side after a graceful close.
    ///
    /// Any partial frame and undrained inbound messages are dropped. Frames
    /// transmitted before the close stay in the outbox until drained.
    pub fn release(&mut self) {
        self.buffer = BytesMut::new();
        self.inbox = VecDeque::new();
        self.discarding = false;
    }

    /// Frees everything after a forced close, outbound frames included.
    pub fn abort(&mut self) {
        self.release();
        self.outbox = VecDeque::new();
    }
}
