//! Connection Records
//!
//! A [`ConnectionRecord`] is the protocol control block of one connection:
//! identity, endpoints, state, traffic counters and timestamps. Records are
//! owned by the connection manager and only change through the state
//! machine or the message handler.

use crate::connection::state::ConnectionState;
use crate::protocol::{UnknownMessagePolicy, DEFAULT_MAX_FRAME_LENGTH};
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default receive window advertised by new connections.
pub const DEFAULT_WINDOW_SIZE: u32 = 65_536;

/// Default receive buffer size for new connections.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Initial sequence numbers are drawn from this range.
const ISN_RANGE: std::ops::RangeInclusive<u32> = 1000..=999_999;

/// Unique identifier of a managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// One side of a connection: a host and a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<(&str, u16)> for Endpoint {
    fn from((host, port): (&str, u16)) -> Self {
        Endpoint::new(host, port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings copied into every new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Advertised receive window
    pub window_size: u32,
    /// Initial capacity of the receive buffer
    pub buffer_size: usize,
    /// Longest accepted frame, excluding the delimiter
    pub max_frame_length: usize,
    /// How unrecognized messages are answered
    pub unknown_message_policy: UnknownMessagePolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            unknown_message_policy: UnknownMessagePolicy::Reply,
        }
    }
}

/// Errors reported by connection operations.
///
/// None of these are fatal. Unknown ids are expected when a close races a
/// send, and rejected transitions are a normal outcome of the state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No connection with this id exists
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// The requested state is not reachable from the current one
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Data transfer attempted outside ESTABLISHED
    #[error("connection {id} is not established (state: {state})")]
    NotEstablished {
        id: ConnectionId,
        state: ConnectionState,
    },
}

/// The per-connection protocol control block.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    id: ConnectionId,
    local_address: Endpoint,
    remote_address: Endpoint,
    state: ConnectionState,
    created_at: Instant,
    last_activity_at: Instant,

    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
    pub(crate) packets_sent: u64,
    pub(crate) packets_received: u64,
    pub(crate) sequence_number: u32,

    window_size: u32,
    buffer_size: usize,

    transitions: u64,
    timed_out: bool,
    gracefully_closed: bool,
}

impl ConnectionRecord {
    /// Creates a record in `CLOSED` with a random initial sequence number.
    pub fn new(
        id: ConnectionId,
        local_address: Endpoint,
        remote_address: Endpoint,
        config: &ConnectionConfig,
    ) -> Self {
        let isn = rand::thread_rng().gen_range(ISN_RANGE);
        Self::with_sequence_number(id, local_address, remote_address, config, isn)
    }

    /// Creates a record with a fixed initial sequence number.
    pub fn with_sequence_number(
        id: ConnectionId,
        local_address: Endpoint,
        remote_address: Endpoint,
        config: &ConnectionConfig,
        sequence_number: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            local_address,
            remote_address,
            state: ConnectionState::Closed,
            created_at: now,
            last_activity_at: now,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            sequence_number,
            window_size: config.window_size,
            buffer_size: config.buffer_size,
            transitions: 0,
            timed_out: false,
            gracefully_closed: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn local_address(&self) -> &Endpoint {
        &self.local_address
    }

    pub fn remote_address(&self) -> &Endpoint {
        &self.remote_address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of state changes applied to this record.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// True if idle reclamation closed this connection.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// True if a full teardown closed this connection.
    pub fn gracefully_closed(&self) -> bool {
        self.gracefully_closed
    }

    /// Time since the last transition or transfer, measured at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    /// Marks the record as active now.
    #[inline]
    pub(crate) fn touch(&mut self) {
        self.last_activity_at = Instant::now().max(self.created_at);
    }

    /// Applies `target` if the state machine allows it.
    ///
    /// Returns `false` and leaves the record untouched otherwise.
    pub fn transition(&mut self, target: ConnectionState) -> bool {
        self.try_transition(target).is_ok()
    }

    /// Like [`transition`](Self::transition) but reports why a step was rejected.
    pub fn try_transition(&mut self, target: ConnectionState) -> Result<(), ConnectionError> {
        if !self.state.can_transition_to(target) {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }

        self.state = target;
        self.transitions += 1;
        self.touch();
        Ok(())
    }

    /// Flags the record as closed by a completed teardown.
    pub(crate) fn mark_gracefully_closed(&mut self) {
        self.gracefully_closed = true;
    }

    /// Forces the record to `CLOSED`, bypassing the transition table.
    ///
    /// Used for idle timeouts. Returns `false` if the record was already
    /// closed, so a connection is never counted as timed out twice.
    pub(crate) fn force_close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        self.state = ConnectionState::Closed;
        self.transitions += 1;
        self.timed_out = true;
        self.touch();
        true
    }
}
