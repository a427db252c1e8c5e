//! # pcbsim - Connection Lifecycle Simulator
//!
//! pcbsim models the lifecycle of protocol connections in the style of a
//! TCP protocol control block. Each connection carries a state from the
//! TCP state diagram, traffic counters, and a message handler that speaks a
//! small newline-framed protocol.
//!
//! ## Features
//!
//! - **State Machine**: 11 TCP-like states with an explicit transition table
//! - **Line Protocol**: `PING` / `ECHO` / `DATA` with reassembly of partial frames
//! - **Concurrent Manager**: Sharded connection index shared across threads
//! - **Idle Reclamation**: Stale connections are force-closed in the background
//! - **TCP Front End**: Real clients become managed connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               pcbsim                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │ TCP Server  │───>│  Session    │───>│      ConnectionManager       │ │
//! │  │ (Listener)  │    │             │    │  ┌────────┐ ┌────────┐       │ │
//! │  └─────────────┘    └─────────────┘    │  │Shard 0 │ │...64   │       │ │
//! │                                        │  └───┬────┘ └────────┘       │ │
//! │  ┌─────────────┐                       │      ▼                       │ │
//! │  │ Simulation  │──────────────────────>│  Record + MessageHandler     │ │
//! │  └─────────────┘                       └──────────────────────────────┘ │
//! │                                                       ▲                 │
//! │                                 ┌─────────────────────┴───────────────┐ │
//! │                                 │            IdleReaper               │ │
//! │                                 │       (Background Tokio Task)       │ │
//! │                                 └─────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use pcbsim::{ConnectionManager, ConnectionState};
//!
//! let manager = ConnectionManager::new();
//! let id = manager.create_connection(("127.0.0.1", 8000), ("192.168.1.1", 80));
//!
//! manager.establish_connection(id).unwrap();
//! manager.send_message(id, "PING hello").unwrap();
//! manager.deliver_inbound(id, b"DATA abcdefghij\n");
//! manager.close_connection(id).unwrap();
//!
//! let stats = manager.statistics();
//! assert_eq!(stats.closed_connections, 1);
//! assert_eq!(stats.in_state(ConnectionState::Closed), 1);
//! ```
//!
//! ## Protocol
//!
//! | Received          | Reply               |
//! |-------------------|---------------------|
//! | `PING <text>`     | `PONG <text>`       |
//! | `ECHO <text>`     | `ECHO_REPLY <text>` |
//! | `DATA <payload>`  | `ACK <line length>` |
//! | anything else     | `UNKNOWN <line>`, or nothing in silent mode |
//!
//! ## Module Overview
//!
//! - [`connection`]: Records, the state machine, and the message handler
//! - [`protocol`]: Line framing and message types
//! - [`manager`]: The connection manager and idle reaper
//! - [`server`]: TCP front end
//! - [`simulate`]: Synthetic workload driver
//! - [`config`]: CLI and TOML configuration

pub mod config;
pub mod connection;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod simulate;

// Re-export commonly used types for convenience
pub use connection::{ConnectionError, ConnectionId, ConnectionRecord, ConnectionState, Endpoint};
pub use manager::{ConnectionManager, IdleReaper, ManagerStats};
pub use protocol::{Message, Reply, UnknownMessagePolicy};

/// The default address the TCP front end binds to
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7070";

/// Version of pcbsim
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
