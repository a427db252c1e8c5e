//! Client Sessions
//!
//! This module bridges a real byte stream to a managed connection. Each
//! accepted client gets its own session task that registers a connection
//! with the manager, feeds it every byte the client sends, and writes back
//! whatever the connection transmits.
//!
//! ## Session Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. create_connection + establish_connection
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  Read bytes from socket      │
//!    │        │                     │
//!    │        ▼                     │
//!    │  deliver_inbound()           │
//!    │        │                     │
//!    │        ▼                     │
//!    │  drain_outbound() -> socket  │
//!    │        │                     │
//!    │   [Loop back]                │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects  -> close_connection()
//!    or idle reclaimed   -> socket dropped
//! ```
//!
//! While the client is silent the session wakes up every
//! [`STATE_POLL_INTERVAL`] to notice a connection the reaper has reclaimed.
//!
//! Manager calls that walk the state machine or dispatch messages may sleep
//! for simulated latency, so they run on Tokio's blocking pool. Dispatched
//! messages are drained after every read.

use crate::connection::{ConnectionError, ConnectionId, ConnectionState, Endpoint};
use crate::manager::ConnectionManager;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// How often an idle session checks whether its connection was reclaimed.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The managed connection went away
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The handshake did not complete
    #[error("handshake refused for {0}")]
    HandshakeRefused(ConnectionId),

    /// A blocking manager call panicked or was cancelled
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The connection was closed underneath the session, e.g. by the reaper
    #[error("connection {id} closed by manager (state: {state})")]
    Reclaimed {
        id: ConnectionId,
        state: ConnectionState,
    },
}

/// Serves one client over any byte stream.
pub struct Session<S> {
    /// The client stream
    stream: BufWriter<S>,

    /// Client's address (for logging)
    peer: Endpoint,

    /// The managed connection behind this session
    id: ConnectionId,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The connection manager (shared across sessions)
    manager: Arc<ConnectionManager>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Registers a new connection for the client and opens it.
    pub async fn open(
        stream: S,
        local: Endpoint,
        peer: Endpoint,
        manager: Arc<ConnectionManager>,
    ) -> Result<Self, SessionError> {
        let id = manager.create_connection(local, peer.clone());
        if !blocking(&manager, move |m| m.establish_connection(id)).await?? {
            return Err(SessionError::HandshakeRefused(id));
        }

        Ok(Self {
            stream: BufWriter::new(stream),
            peer,
            id,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            manager,
        })
    }

    /// The managed connection behind this session.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs the session until the client leaves or the connection is closed.
    ///
    /// On a clean client disconnect the connection is closed gracefully.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!(client = %self.peer, conn = %self.id, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.peer, "Client disconnected gracefully"),
            Err(SessionError::ClientDisconnected) => {
                debug!(client = %self.peer, "Client disconnected")
            }
            Err(SessionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(SessionError::Reclaimed { state, .. }) => {
                info!(client = %self.peer, conn = %self.id, %state, "Connection reclaimed")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Session error"),
        }

        // Whatever ended the session, an established connection is torn down
        let id = self.id;
        match blocking(&self.manager, move |m| m.close_connection(id)).await {
            Ok(Ok(true)) => debug!(conn = %id, "Connection closed"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => debug!(conn = %id, error = %e, "Connection already gone"),
            Err(e) => warn!(conn = %id, error = %e, "Close failed"),
        }

        result
    }

    /// The main read-deliver-respond loop.
    async fn main_loop(&mut self) -> Result<(), SessionError> {
        loop {
            self.ensure_open()?;

            let read = tokio::time::timeout(
                STATE_POLL_INTERVAL,
                self.stream.read_buf(&mut self.buffer),
            )
            .await;

            let n = match read {
                Ok(result) => result?,
                // Quiet client; go round and check the connection state
                Err(_) => continue,
            };

            if n == 0 {
                return Err(SessionError::ClientDisconnected);
            }

            trace!(client = %self.peer, bytes = n, "Read data");
            let data = Bytes::copy_from_slice(&self.buffer);
            self.buffer.clear();

            let id = self.id;
            let dispatched =
                blocking(&self.manager, move |m| m.deliver_inbound(id, &data)).await?;
            for message in self.manager.drain_inbound(id)? {
                trace!(client = %self.peer, verb = message.verb(), "Handled message");
            }
            trace!(client = %self.peer, dispatched, "Delivered data");

            self.flush_outbound().await?;
        }
    }

    /// Fails if the connection can no longer carry data.
    fn ensure_open(&self) -> Result<(), SessionError> {
        let state = self.manager.state(self.id)?;
        if state.can_transfer() {
            Ok(())
        } else {
            Err(SessionError::Reclaimed { id: self.id, state })
        }
    }

    /// Writes every frame the connection transmitted to the client.
    async fn flush_outbound(&mut self) -> Result<(), SessionError> {
        let frames = self.manager.drain_outbound(self.id)?;
        if frames.is_empty() {
            return Ok(());
        }

        let mut written = 0;
        for frame in &frames {
            self.stream.write_all(frame).await?;
            written += frame.len();
        }
        self.stream.flush().await?;

        trace!(client = %self.peer, frames = frames.len(), bytes = written, "Sent frames");
        Ok(())
    }
}

/// Runs a manager call on the blocking pool.
async fn blocking<R, F>(manager: &Arc<ConnectionManager>, f: F) -> Result<R, SessionError>
where
    F: FnOnce(&ConnectionManager) -> R + Send + 'static,
    R: Send + 'static,
{
    let manager = Arc::clone(manager);
    Ok(tokio::task::spawn_blocking(move || f(&manager)).await?)
}

/// Handles a client connection.
///
/// This is a convenience function that opens a [`Session`] for the stream
/// and runs it to completion.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<ConnectionManager>,
) {
    let local = match stream.local_addr() {
        Ok(addr) => Endpoint::from(addr),
        Err(e) => {
            warn!(client = %peer, error = %e, "Could not read local address");
            return;
        }
    };

    let session = match Session::open(stream, local, Endpoint::from(peer), manager).await {
        Ok(session) => session,
        Err(e) => {
            warn!(client = %peer, error = %e, "Could not open session");
            return;
        }
    };

    if let Err(e) = session.run().await {
        match e {
            SessionError::ClientDisconnected | SessionError::Reclaimed { .. } => {}
            SessionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %peer, error = %e, "Session ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn endpoints() -> (Endpoint, Endpoint) {
        (
            Endpoint::new("127.0.0.1", 7070),
            Endpoint::new("127.0.0.1", 50000),
        )
    }

    #[tokio::test]
    async fn test_session_replies_and_closes() {
        let manager = Arc::new(ConnectionManager::new());
        let (local, peer) = endpoints();

        let stream = Builder::new()
            .read(b"PING hello\n")
            .write(b"PONG hello\n")
            .read(b"DATA abcde")
            .read(b"fghij\nECHO hi\n")
            .write(b"ACK 15\nECHO_REPLY hi\n")
            .build();

        let session = Session::open(stream, local, peer, Arc::clone(&manager))
            .await
            .unwrap();
        let id = session.id();

        let result = session.run().await;
        assert!(matches!(result, Err(SessionError::ClientDisconnected)));

        let rec = manager.record(id).unwrap();
        assert_eq!(rec.state(), ConnectionState::Closed);
        assert!(rec.gracefully_closed());
        assert_eq!(rec.bytes_received(), 11 + 10 + 14);
        assert_eq!(rec.packets_received(), 3);
        assert_eq!(rec.packets_sent(), 3);
    }

    #[tokio::test]
    async fn test_session_silent_policy_writes_nothing() {
        use crate::connection::{ConnectionConfig, NoLatency};
        use crate::protocol::UnknownMessagePolicy;

        let manager = Arc::new(ConnectionManager::with_config(
            ConnectionConfig {
                unknown_message_policy: UnknownMessagePolicy::Silent,
                ..Default::default()
            },
            Arc::new(NoLatency),
        ));
        let (local, peer) = endpoints();

        let stream = Builder::new().read(b"HELLO\n").build();
        let session = Session::open(stream, local, peer, Arc::clone(&manager))
            .await
            .unwrap();
        let id = session.id();

        let _ = session.run().await;
        assert_eq!(manager.record(id).unwrap().bytes_sent(), 0);
    }

    #[tokio::test]
    async fn test_session_ends_when_reclaimed() {
        let manager = Arc::new(ConnectionManager::new());
        let (local, peer) = endpoints();

        let stream = Builder::new().wait(Duration::from_secs(5)).build();
        let session = Session::open(stream, local, peer, Arc::clone(&manager))
            .await
            .unwrap();
        let id = session.id();

        let task = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.reclaim_idle(Duration::ZERO), 1);

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session should notice the reclaim")
            .unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Reclaimed {
                state: ConnectionState::Closed,
                ..
            })
        ));
        assert!(manager.record(id).unwrap().timed_out());
    }

    #[tokio::test]
    async fn test_session_drains_inbound() {
        let manager = Arc::new(ConnectionManager::new());
        let (local, peer) = endpoints();

        let mut builder = Builder::new();
        for _ in 0..1000 {
            builder.read(b"PING x\n").write(b"PONG x\n");
        }
        let stream = builder.build();

        let session = Session::open(stream, local, peer, Arc::clone(&manager))
            .await
            .unwrap();
        let id = session.id();

        let result = session.run().await;
        assert!(matches!(result, Err(SessionError::ClientDisconnected)));

        assert_eq!(manager.drain_inbound(id), Ok(vec![]));
        let rec = manager.record(id).unwrap();
        assert_eq!(rec.bytes_received(), 7000);
        assert_eq!(rec.packets_sent(), 1000);
    }

    #[tokio::test]
    async fn test_latency_does_not_block_runtime() {
        use crate::connection::{ConnectionConfig, RandomLatency};
        use std::time::Instant;

        let latency = Duration::from_millis(300);
        let manager = Arc::new(ConnectionManager::with_config(
            ConnectionConfig::default(),
            Arc::new(RandomLatency::new(latency, latency)),
        ));
        let (local, peer) = endpoints();

        let ticker = tokio::spawn(async {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(10)).await;
            start.elapsed()
        });

        let stream = Builder::new().build();
        let session = Session::open(stream, local, peer, Arc::clone(&manager))
            .await
            .unwrap();
        assert_eq!(
            manager.state(session.id()),
            Ok(ConnectionState::Established)
        );

        // The handshake slept on the blocking pool, not on the runtime
        let woke = ticker.await.unwrap();
        assert!(woke < Duration::from_millis(200), "ticker woke after {:?}", woke);
    }
}
