//! Connection Module
//!
//! This module models a single stream connection at the application level:
//! its protocol control block, the state machine that governs it, and the
//! message handler that speaks the line protocol over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ConnectionManager                        │
//! │                     (manager module)                        │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ owns, one per connection
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ┌──────────────────┐        ┌──────────────────┐           │
//! │  │ ConnectionRecord │<───────│  MessageHandler  │           │
//! │  │  state, counters │ mutates│ buffer, in/outbox│           │
//! │  └────────┬─────────┘        └──────────────────┘           │
//! │           │ validated by                                    │
//! │           ▼                                                 │
//! │  ┌──────────────────┐                                       │
//! │  │ ConnectionState  │  transition table                     │
//! │  └──────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use pcbsim::connection::{
//!     ConnectionConfig, ConnectionId, ConnectionRecord, ConnectionState, MessageHandler,
//!     NoLatency, HANDSHAKE,
//! };
//! use std::sync::Arc;
//!
//! let config = ConnectionConfig::default();
//! let mut record = ConnectionRecord::new(
//!     ConnectionId::new(1),
//!     ("127.0.0.1", 8000).into(),
//!     ("10.0.0.1", 80).into(),
//!     &config,
//! );
//! for step in HANDSHAKE {
//!     assert!(record.transition(step));
//! }
//! assert_eq!(record.state(), ConnectionState::Established);
//!
//! let mut handler = MessageHandler::new(&config, Arc::new(NoLatency));
//! handler.receive(&mut record, b"PING hi\n");
//! assert_eq!(&handler.drain_outbound()[0][..], b"PONG hi\n");
//! ```

pub mod handler;
pub mod latency;
pub mod record;
pub mod state;

// Re-export commonly used types
pub use handler::MessageHandler;
pub use latency::{DelayKind, Latency, NoLatency, RandomLatency};
pub use record::{
    ConnectionConfig, ConnectionError, ConnectionId, ConnectionRecord, Endpoint,
    DEFAULT_BUFFER_SIZE, DEFAULT_WINDOW_SIZE,
};
pub use state::{ConnectionState, HANDSHAKE, PASSIVE_CLOSE, PASSIVE_OPEN, TEARDOWN};
