//! Thread-Safe Connection Manager
//!
//! This module implements the connection manager: the single owner of every
//! connection record. It creates connections, drives them through the state
//! machine, routes traffic to their message handlers, reclaims idle ones and
//! reports statistics.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Index**: Connections are spread across 64 shards so that
//!    creating or looking up one connection does not contend with the rest.
//! 2. **Per-Connection Lock**: Each connection sits behind its own `Mutex`.
//!    Shard locks are held only long enough to find the connection, so
//!    operations on one connection are serialized while different
//!    connections proceed in parallel.
//! 3. **Projected Statistics**: Counters live on the records. `statistics()`
//!    sums them on demand instead of keeping a second set of running totals.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConnectionManager                         │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │
//! │  │ Shard 0  │ │ Shard 1  │ │ Shard 2  │ │ Shard N  │          │
//! │  │ RwLock   │ │ RwLock   │ │ RwLock   │ │ RwLock   │          │
//! │  │ HashMap  │ │ HashMap  │ │ HashMap  │ │ HashMap  │          │
//! │  └────┬─────┘ └──────────┘ └──────────┘ └──────────┘          │
//! │       │ id -> Arc<Mutex<Connection>>                          │
//! │       ▼                                                       │
//! │  ┌────────────────────────────────┐                           │
//! │  │ ConnectionRecord + Handler     │                           │
//! │  └────────────────────────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::connection::{
    ConnectionConfig, ConnectionError, ConnectionId, ConnectionRecord, ConnectionState,
    DelayKind, Endpoint, Latency, MessageHandler, NoLatency, HANDSHAKE, PASSIVE_CLOSE,
    PASSIVE_OPEN, TEARDOWN,
};
use crate::protocol::{encode_line, Message};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Number of shards in the connection index.
const NUM_SHARDS: usize = 64;

/// Result type for manager operations addressed by id.
pub type ManagerResult<T> = Result<T, ConnectionError>;

/// A managed connection: the record plus its protocol state.
#[derive(Debug)]
struct Connection {
    record: ConnectionRecord,
    handler: MessageHandler,
}

type Slot = Arc<Mutex<Connection>>;

/// A single shard of the connection index.
#[derive(Debug, Default)]
struct Shard {
    connections: RwLock<HashMap<ConnectionId, Slot>>,
}

/// Counters of connections removed by [`ConnectionManager::purge_closed`].
#[derive(Debug, Default, Clone, Copy)]
struct Retired {
    connections: u64,
    closed: u64,
    timed_out: u64,
    bytes_sent: u64,
    bytes_received: u64,
    packets_sent: u64,
    packets_received: u64,
    state_transitions: u64,
}

impl Retired {
    fn absorb(&mut self, record: &ConnectionRecord) {
        self.connections += 1;
        self.closed += u64::from(record.gracefully_closed());
        self.timed_out += u64::from(record.timed_out());
        self.bytes_sent += record.bytes_sent();
        self.bytes_received += record.bytes_received();
        self.packets_sent += record.packets_sent();
        self.packets_received += record.packets_received();
        self.state_transitions += record.transitions();
    }
}

/// Owns every connection and sequences all lifecycle operations.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared between threads or tasks.
/// All operations take `&self`.
///
/// # Example
///
/// ```
/// use pcbsim::manager::ConnectionManager;
/// use pcbsim::connection::ConnectionState;
///
/// let manager = ConnectionManager::new();
/// let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
///
/// assert_eq!(manager.establish_connection(id), Ok(true));
/// assert_eq!(manager.send_message(id, "PING hello"), Ok(true));
/// assert_eq!(manager.close_connection(id), Ok(true));
/// assert_eq!(manager.state(id), Ok(ConnectionState::Closed));
/// ```
pub struct ConnectionManager {
    /// Sharded connection index
    shards: Vec<Shard>,

    /// Last id handed out
    next_id: AtomicU64,

    /// Settings copied into new connections
    config: ConnectionConfig,

    /// Latency strategy shared by every connection
    latency: Arc<dyn Latency>,

    /// Totals of purged connections
    retired: Mutex<Retired>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("shards", &self.shards.len())
            .field("connections", &self.len())
            .field("config", &self.config)
            .field("latency", &self.latency)
            .finish()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Every mutation under these locks updates whole fields, so a poisoned
/// lock still guards consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Walks `record` along `path`, stopping at the first rejected step.
///
/// The record stays wherever it got to; nothing is rolled back.
fn drive(
    record: &mut ConnectionRecord,
    path: &[ConnectionState],
    latency: &dyn Latency,
    kind: DelayKind,
) -> bool {
    for (i, &step) in path.iter().enumerate() {
        if let Err(e) = record.try_transition(step) {
            debug!(conn = %record.id(), error = %e, "Transition sequence aborted");
            return false;
        }
        if i == 0 {
            latency.pause(kind);
        }
    }
    true
}

impl ConnectionManager {
    /// Creates a manager with default settings and no simulated latency.
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default(), Arc::new(NoLatency))
    }

    /// Creates a manager with the given connection settings and latency.
    pub fn with_config(config: ConnectionConfig, latency: Arc<dyn Latency>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            next_id: AtomicU64::new(0),
            config,
            latency,
            retired: Mutex::new(Retired::default()),
        }
    }

    /// The settings new connections are created with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Gets the shard for a given id.
    #[inline]
    fn shard(&self, id: ConnectionId) -> &Shard {
        &self.shards[(id.as_u64() % NUM_SHARDS as u64) as usize]
    }

    /// Looks up the slot of a connection.
    fn slot(&self, id: ConnectionId) -> ManagerResult<Slot> {
        let connections = self
            .shard(id)
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections
            .get(&id)
            .cloned()
            .ok_or(ConnectionError::NotFound(id))
    }

    /// Runs `f` with exclusive access to one connection.
    fn with_connection<R>(
        &self,
        id: ConnectionId,
        f: impl FnOnce(&mut Connection) -> R,
    ) -> ManagerResult<R> {
        let slot = self.slot(id)?;
        let mut conn = lock(&slot);
        Ok(f(&mut conn))
    }

    /// Snapshots every slot so they can be visited without holding shard locks.
    fn slots(&self) -> Vec<Slot> {
        self.shards
            .iter()
            .flat_map(|shard| {
                let connections = shard
                    .connections
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                connections.values().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    /// Creates a connection in `CLOSED` and returns its id. Never fails.
    pub fn create_connection(
        &self,
        local: impl Into<Endpoint>,
        remote: impl Into<Endpoint>,
    ) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = ConnectionRecord::new(id, local.into(), remote.into(), &self.config);
        let handler = MessageHandler::new(&self.config, Arc::clone(&self.latency));

        debug!(
            conn = %id,
            local = %record.local_address(),
            remote = %record.remote_address(),
            isn = record.sequence_number(),
            "Connection created"
        );

        let slot = Arc::new(Mutex::new(Connection { record, handler }));
        self.shard(id)
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot);

        id
    }

    /// Runs the active-open handshake (`SYN_SENT → SYN_RECEIVED → ESTABLISHED`).
    ///
    /// Returns `Ok(true)` only if the connection ends up established. A
    /// rejected step leaves the connection at the last state it reached.
    pub fn establish_connection(&self, id: ConnectionId) -> ManagerResult<bool> {
        self.with_connection(id, |conn| {
            let ok = drive(
                &mut conn.record,
                &HANDSHAKE,
                self.latency.as_ref(),
                DelayKind::Handshake,
            );
            if ok {
                debug!(conn = %id, "Connection established");
            }
            ok
        })
    }

    /// Moves a fresh connection into `LISTEN` for a passive open.
    pub fn listen(&self, id: ConnectionId) -> ManagerResult<bool> {
        self.transition(id, ConnectionState::Listen)
    }

    /// Completes a passive open from `LISTEN` (`SYN_RECEIVED → ESTABLISHED`).
    pub fn accept(&self, id: ConnectionId) -> ManagerResult<bool> {
        self.with_connection(id, |conn| {
            let ok = drive(
                &mut conn.record,
                &PASSIVE_OPEN,
                self.latency.as_ref(),
                DelayKind::Handshake,
            );
            if ok {
                debug!(conn = %id, "Connection accepted");
            }
            ok
        })
    }

    /// Applies one validated transition.
    pub fn transition(&self, id: ConnectionId, target: ConnectionState) -> ManagerResult<bool> {
        self.with_connection(id, |conn| {
            let from = conn.record.state();
            let ok = conn.record.transition(target);
            trace!(conn = %id, %from, to = %target, ok, "Transition requested");
            ok
        })
    }

    /// Sends `text` followed by the frame delimiter.
    ///
    /// Returns `Ok(false)` if the connection is not established.
    pub fn send_message(&self, id: ConnectionId, text: &str) -> ManagerResult<bool> {
        let frame = encode_line(text);
        self.with_connection(id, |conn| conn.handler.send(&mut conn.record, frame))
    }

    /// Feeds raw inbound bytes to a connection's message handler.
    ///
    /// Unknown or unestablished connections are ignored. Returns the number
    /// of messages dispatched.
    pub fn deliver_inbound(&self, id: ConnectionId, data: &[u8]) -> usize {
        self.with_connection(id, |conn| conn.handler.receive(&mut conn.record, data))
            .unwrap_or_else(|e| {
                trace!(error = %e, "Inbound data for unknown connection dropped");
                0
            })
    }

    /// Runs the active close (`FIN_WAIT_1 → FIN_WAIT_2 → TIME_WAIT → CLOSED`).
    ///
    /// Only established connections can be closed this way; anything else
    /// returns `Ok(false)` unchanged. The closed record is kept so its
    /// counters remain visible in [`statistics`](Self::statistics).
    pub fn close_connection(&self, id: ConnectionId) -> ManagerResult<bool> {
        self.close_along(id, &TEARDOWN)
    }

    /// Runs the passive close after the peer closed first
    /// (`CLOSE_WAIT → LAST_ACK → CLOSED`).
    pub fn peer_close(&self, id: ConnectionId) -> ManagerResult<bool> {
        self.close_along(id, &PASSIVE_CLOSE)
    }

    fn close_along(&self, id: ConnectionId, path: &[ConnectionState]) -> ManagerResult<bool> {
        self.with_connection(id, |conn| {
            if conn.record.state() != ConnectionState::Established {
                debug!(conn = %id, state = %conn.record.state(), "Close refused, not established");
                return false;
            }

            let ok = drive(
                &mut conn.record,
                path,
                self.latency.as_ref(),
                DelayKind::Teardown,
            );
            if ok {
                conn.record.mark_gracefully_closed();
                conn.handler.release();
                debug!(
                    conn = %id,
                    bytes_sent = conn.record.bytes_sent(),
                    bytes_received = conn.record.bytes_received(),
                    "Connection closed"
                );
            }
            ok
        })
    }

    /// Force-closes every connection idle for at least `threshold`.
    ///
    /// Returns how many connections timed out in this pass.
    pub fn reclaim_idle(&self, threshold: Duration) -> usize {
        self.reclaim_idle_at(Instant::now(), threshold)
    }

    /// Like [`reclaim_idle`](Self::reclaim_idle), measuring idleness at `now`.
    ///
    /// Connections already in `CLOSED` are skipped, so a connection is
    /// counted as timed out at most once.
    pub fn reclaim_idle_at(&self, now: Instant, threshold: Duration) -> usize {
        let mut reclaimed = 0;

        for slot in self.slots() {
            let mut guard = lock(&slot);
            let conn = &mut *guard;
            let record = &mut conn.record;

            if record.state() == ConnectionState::Closed || record.idle_for(now) < threshold {
                continue;
            }

            let state = record.state();
            if record.force_close() {
                conn.handler.abort();
                debug!(conn = %record.id(), from = %state, "Idle connection reclaimed");
                reclaimed += 1;
            }
        }

        reclaimed
    }

    /// Removes connections that have reached their terminal `CLOSED` state.
    ///
    /// Their counters are folded into the manager's totals first, so
    /// statistics never go backwards. Connections that were created but
    /// never opened are kept.
    pub fn purge_closed(&self) -> usize {
        let mut purged = 0;

        // Lock order: retired, then shard, then slot
        let mut retired = lock(&self.retired);
        for shard in &self.shards {
            let mut connections = shard
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            connections.retain(|_, slot| {
                let conn = lock(slot);
                let terminal = conn.record.state() == ConnectionState::Closed
                    && conn.record.transitions() > 0;
                if terminal {
                    retired.absorb(&conn.record);
                    purged += 1;
                }
                !terminal
            });
        }
        drop(retired);

        if purged > 0 {
            debug!(purged, remaining = self.len(), "Closed connections purged");
        }
        purged
    }

    /// Current state of a connection.
    pub fn state(&self, id: ConnectionId) -> ManagerResult<ConnectionState> {
        self.with_connection(id, |conn| conn.record.state())
    }

    /// A copy of a connection's record.
    pub fn record(&self, id: ConnectionId) -> ManagerResult<ConnectionRecord> {
        self.with_connection(id, |conn| conn.record.clone())
    }

    /// Takes the frames a connection has transmitted since the last drain.
    pub fn drain_outbound(&self, id: ConnectionId) -> ManagerResult<Vec<Bytes>> {
        self.with_connection(id, |conn| conn.handler.drain_outbound())
    }

    /// Takes the messages a connection has dispatched since the last drain.
    pub fn drain_inbound(&self, id: ConnectionId) -> ManagerResult<Vec<Message>> {
        self.with_connection(id, |conn| conn.handler.drain_inbound())
    }

    /// Returns true if the connection exists.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.slot(id).is_ok()
    }

    /// Ids of every connection currently held, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .shards
            .iter()
            .flat_map(|shard| {
                let connections = shard
                    .connections
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                connections.keys().copied().collect::<Vec<_>>()
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of connections currently held.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .connections
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len()
            })
            .sum()
    }

    /// Returns true if no connections are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Computes aggregated statistics from the current connections.
    ///
    /// Each connection is read under its own lock, so the snapshot is exact
    /// when nothing else is running and approximate under concurrent use.
    pub fn statistics(&self) -> ManagerStats {
        // Held for the whole scan so a concurrent purge cannot move records
        // out of view between the two halves of the snapshot
        let retired_guard = lock(&self.retired);
        let retired = *retired_guard;

        let mut stats = ManagerStats {
            total_connections: retired.connections,
            closed_connections: retired.closed,
            timed_out_connections: retired.timed_out,
            bytes_sent: retired.bytes_sent,
            bytes_received: retired.bytes_received,
            packets_sent: retired.packets_sent,
            packets_received: retired.packets_received,
            state_transitions: retired.state_transitions,
            ..Default::default()
        };

        for slot in self.slots() {
            let conn = lock(&slot);
            let record = &conn.record;

            stats.total_connections += 1;
            stats.current_connections += 1;
            if record.state() == ConnectionState::Established {
                stats.active_connections += 1;
            }
            stats.closed_connections += u64::from(record.gracefully_closed());
            stats.timed_out_connections += u64::from(record.timed_out());
            stats.bytes_sent += record.bytes_sent();
            stats.bytes_received += record.bytes_received();
            stats.packets_sent += record.packets_sent();
            stats.packets_received += record.packets_received();
            stats.state_transitions += record.transitions();
            stats.frames_dropped += conn.handler.frames_dropped();
            *stats.state_distribution.entry(record.state()).or_insert(0) += 1;
        }
        drop(retired_guard);

        stats
    }
}

/// Aggregated connection statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Connections ever created
    pub total_connections: u64,
    /// Connections currently held by the manager
    pub current_connections: u64,
    /// Connections currently established
    pub active_connections: u64,
    /// Connections closed by a full teardown
    pub closed_connections: u64,
    /// Connections force-closed by idle reclamation
    pub timed_out_connections: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total frames sent
    pub packets_sent: u64,
    /// Total receive calls accepted
    pub packets_received: u64,
    /// Total state changes
    pub state_transitions: u64,
    /// Oversize frames dropped by current connections
    pub frames_dropped: u64,
    /// Current connections grouped by state
    pub state_distribution: BTreeMap<ConnectionState, u64>,
}

impl ManagerStats {
    /// Bytes sent plus bytes received.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_sent + self.bytes_received
    }

    /// Packets sent plus packets received.
    pub fn packets_transferred(&self) -> u64 {
        self.packets_sent + self.packets_received
    }

    /// Number of current connections in `state`.
    pub fn in_state(&self, state: ConnectionState) -> u64 {
        self.state_distribution.get(&state).copied().unwrap_or(0)
    }
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total_connections:     {}", self.total_connections)?;
        writeln!(f, "current_connections:   {}", self.current_connections)?;
        writeln!(f, "active_connections:    {}", self.active_connections)?;
        writeln!(f, "closed_connections:    {}", self.closed_connections)?;
        writeln!(f, "timed_out_connections: {}", self.timed_out_connections)?;
        writeln!(f, "bytes_sent:            {}", self.bytes_sent)?;
        writeln!(f, "bytes_received:        {}", self.bytes_received)?;
        writeln!(f, "bytes_transferred:     {}", self.bytes_transferred())?;
        writeln!(f, "packets_sent:          {}", self.packets_sent)?;
        writeln!(f, "packets_received:      {}", self.packets_received)?;
        writeln!(f, "packets_transferred:   {}", self.packets_transferred())?;
        writeln!(f, "state_transitions:     {}", self.state_transitions)?;
        writeln!(f, "frames_dropped:        {}", self.frames_dropped)?;
        write!(f, "state_distribution:   ")?;
        for (state, count) in &self.state_distribution {
            write!(f, " {}={}", state, count)?;
        }
        Ok(())
    }
}
