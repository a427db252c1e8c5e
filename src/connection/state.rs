//! Connection State Machine
//!
//! The eleven states of a TCP-style protocol control block and the table of
//! legal transitions between them.
//!
//! ```text
//!                    ┌────────┐
//!          ┌────────>│ CLOSED │<──────────────────────────────┐
//!          │         └───┬────┘                               │
//!          │     passive │      active                        │
//!          │             ▼         │                          │
//!          │        ┌────────┐     ▼                          │
//!          ├────────│ LISTEN │  ┌──────────┐                  │
//!          │        └───┬────┘  │ SYN_SENT │──────┐           │
//!          │            ▼       └────┬─────┘      │           │
//!          │    ┌──────────────┐<────┘            │           │
//!          └────│ SYN_RECEIVED │                  │           │
//!               └──────┬───────┘                  │           │
//!                      ▼                          ▼           │
//!               ┌─────────────┐<──────────────────┘           │
//!               │ ESTABLISHED │────────────┐                  │
//!               └──────┬──────┘            ▼                  │
//!                      ▼            ┌────────────┐            │
//!               ┌────────────┐      │ CLOSE_WAIT │            │
//!               │ FIN_WAIT_1 │      └─────┬──────┘            │
//!               └─┬───┬────┬─┘            ▼                   │
//!                 │   │    │        ┌──────────┐              │
//!                 │   │    │        │ LAST_ACK │──────────────┤
//!                 ▼   │    ▼        └──────────┘              │
//!     ┌────────────┐  │  ┌─────────┐                          │
//!     │ FIN_WAIT_2 │  │  │ CLOSING │                          │
//!     └─────┬──────┘  │  └────┬────┘                          │
//!           ▼         ▼       ▼                               │
//!         ┌──────────────────────┐                            │
//!         │      TIME_WAIT       │────────────────────────────┘
//!         └──────────────────────┘
//! ```
//!
//! `SYN_RECEIVED` may also move straight to `FIN_WAIT_1`, and `SYN_SENT`
//! may give up and return to `CLOSED`.

use std::fmt;
use std::str::FromStr;

/// Every state a connection record can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ConnectionState {
    /// No connection. Both the initial and the terminal state.
    #[default]
    Closed,
    /// Waiting for a connection request.
    Listen,
    /// Connection request sent, waiting for the peer.
    SynSent,
    /// Connection request received and answered.
    SynReceived,
    /// Handshake complete, data may flow.
    Established,
    /// Local close started.
    FinWait1,
    /// Local close acknowledged, waiting for the peer to close.
    FinWait2,
    /// Peer closed, waiting for the local close.
    CloseWait,
    /// Both sides closed at the same time.
    Closing,
    /// Waiting for the acknowledgement of the local close.
    LastAck,
    /// Waiting out stray segments before closing.
    TimeWait,
}

impl ConnectionState {
    /// All states, in declaration order.
    pub const ALL: [ConnectionState; 11] = [
        ConnectionState::Closed,
        ConnectionState::Listen,
        ConnectionState::SynSent,
        ConnectionState::SynReceived,
        ConnectionState::Established,
        ConnectionState::FinWait1,
        ConnectionState::FinWait2,
        ConnectionState::CloseWait,
        ConnectionState::Closing,
        ConnectionState::LastAck,
        ConnectionState::TimeWait,
    ];

    /// The states reachable from `self` in one step.
    pub fn allowed_transitions(self) -> &'static [ConnectionState] {
        use ConnectionState::*;

        match self {
            Closed => &[Listen, SynSent],
            Listen => &[SynReceived, Closed],
            SynSent => &[SynReceived, Established, Closed],
            SynReceived => &[Established, FinWait1, Closed],
            Established => &[FinWait1, CloseWait],
            FinWait1 => &[FinWait2, Closing, TimeWait],
            FinWait2 => &[TimeWait],
            CloseWait => &[LastAck],
            Closing => &[TimeWait],
            LastAck => &[Closed],
            TimeWait => &[Closed],
        }
    }

    /// Returns true if moving from `self` to `target` is legal.
    #[inline]
    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Returns true if data may be sent or received in this state.
    #[inline]
    pub fn can_transfer(self) -> bool {
        self == ConnectionState::Established
    }

    /// Returns true once the handshake has completed and the connection
    /// has not yet fully closed.
    pub fn is_synchronized(self) -> bool {
        !matches!(
            self,
            ConnectionState::Closed
                | ConnectionState::Listen
                | ConnectionState::SynSent
                | ConnectionState::SynReceived
        )
    }

    /// The protocol name of the state, e.g. `FIN_WAIT_1`.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::SynReceived => "SYN_RECEIVED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::FinWait1 => "FIN_WAIT_1",
            ConnectionState::FinWait2 => "FIN_WAIT_2",
            ConnectionState::CloseWait => "CLOSE_WAIT",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::LastAck => "LAST_ACK",
            ConnectionState::TimeWait => "TIME_WAIT",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown connection state '{}'", s))
    }
}

/// Active open: `CLOSED → SYN_SENT → SYN_RECEIVED → ESTABLISHED`.
pub const HANDSHAKE: [ConnectionState; 3] = [
    ConnectionState::SynSent,
    ConnectionState::SynReceived,
    ConnectionState::Established,
];

/// Passive open from `LISTEN`: `SYN_RECEIVED → ESTABLISHED`.
pub const PASSIVE_OPEN: [ConnectionState; 2] =
    [ConnectionState::SynReceived, ConnectionState::Established];

/// Active close: `ESTABLISHED → FIN_WAIT_1 → FIN_WAIT_2 → TIME_WAIT → CLOSED`.
pub const TEARDOWN: [ConnectionState; 4] = [
    ConnectionState::FinWait1,
    ConnectionState::FinWait2,
    ConnectionState::TimeWait,
    ConnectionState::Closed,
];

/// Passive close: `ESTABLISHED → CLOSE_WAIT → LAST_ACK → CLOSED`.
pub const PASSIVE_CLOSE: [ConnectionState; 3] = [
    ConnectionState::CloseWait,
    ConnectionState::LastAck,
    ConnectionState::Closed,
];
