//! TCP Front End
//!
//! Exposes the connection manager over real sockets. Every accepted client
//! becomes a managed connection: the bytes it sends are delivered to the
//! connection's message handler and the replies are written back.
//!
//! ```text
//!   client ──bytes──> Session ──deliver_inbound──> ConnectionManager
//!   client <─frames── Session <──drain_outbound───        │
//!                                                         │ reclaim_idle
//!                                                    IdleReaper
//! ```
//!
//! Any line-oriented tool works as a client:
//!
//! ```text
//! $ nc 127.0.0.1 7070
//! PING hello
//! PONG hello
//! DATA abcdefghij
//! ACK 15
//! ```

pub mod session;

pub use session::{handle_connection, Session, SessionError, STATE_POLL_INTERVAL};

use crate::manager::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Accepts clients forever, spawning a session task for each.
pub async fn serve(listener: TcpListener, manager: Arc<ConnectionManager>) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Accepting connections");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let manager = Arc::clone(&manager);

                tokio::spawn(async move {
                    handle_connection(stream, addr, manager).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
