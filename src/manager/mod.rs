//! Connection Manager Module
//!
//! This module owns every connection and sequences their lifecycles. It
//! includes the thread-safe, sharded connection manager and a background
//! reaper that reclaims idle connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ reclaim_idle()
//!              ┌─────────────┴─────────────┐
//!              │        IdleReaper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! - `create_connection` → `CLOSED`
//! - `establish_connection` → `SYN_SENT → SYN_RECEIVED → ESTABLISHED`
//! - `send_message` / `deliver_inbound` while `ESTABLISHED`
//! - `close_connection` → `FIN_WAIT_1 → FIN_WAIT_2 → TIME_WAIT → CLOSED`
//! - `reclaim_idle` forces idle connections straight to `CLOSED`
//!
//! ## Example
//!
//! ```
//! use pcbsim::manager::ConnectionManager;
//! use std::time::Duration;
//!
//! let manager = ConnectionManager::new();
//! let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
//! manager.establish_connection(id).unwrap();
//!
//! manager.deliver_inbound(id, b"PING hello\n");
//! assert_eq!(&manager.drain_outbound(id).unwrap()[0][..], b"PONG hello\n");
//!
//! manager.reclaim_idle(Duration::from_secs(60));
//! println!("{}", manager.statistics());
//! ```

pub mod engine;
pub mod reaper;

// Re-export commonly used types
pub use engine::{ConnectionManager, ManagerResult, ManagerStats};
pub use reaper::{start_idle_reaper, IdleReaper, ReaperConfig};
