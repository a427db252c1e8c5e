//! Workload Simulation
//!
//! Drives a [`ConnectionManager`] through a synthetic workload without any
//! sockets. Each round:
//!
//! 1. Creates and establishes a batch of connections
//! 2. Sends random `PING` / `ECHO` / `DATA` messages and plays the peer's
//!    replies back into the connections
//! 3. Closes a random half of the batch
//! 4. Every third round, fires a burst of data at established connections
//! 5. Every fifth round, reclaims idle connections
//!
//! Outbound frames are drained after every round, as if a network had
//! carried them away.

use crate::config::SimulateConfig;
use crate::connection::{ConnectionId, ConnectionState};
use crate::manager::{ConnectionManager, ManagerStats};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Messages the simulated clients send.
pub const MESSAGE_TYPES: [&str; 3] = [
    "PING hello",
    "ECHO test message",
    "DATA sample_data_payload",
];

/// Frames sent to established connections in a burst round.
pub const BURST_SIZE: usize = 20;

/// Rounds between bursts.
const BURST_EVERY: usize = 3;

/// Rounds between idle reclamation passes.
const RECLAIM_EVERY: usize = 5;

/// What happened during one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub connections_created: usize,
    pub connections_established: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub connections_closed: usize,
    pub burst_messages: usize,
    pub reclaimed: usize,
    pub frames_drained: usize,
    pub elapsed: Duration,
}

/// Outcome of a whole simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub rounds: Vec<RoundReport>,
    pub stats: ManagerStats,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Messages sent and received across all rounds, bursts included.
    pub fn total_messages(&self) -> usize {
        self.rounds
            .iter()
            .map(|r| r.messages_sent + r.messages_received + r.burst_messages)
            .sum()
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, round) in self.rounds.iter().enumerate() {
            writeln!(
                f,
                "round {:>3}: created={} established={} sent={} received={} closed={} burst={} reclaimed={} ({:?})",
                i,
                round.connections_created,
                round.connections_established,
                round.messages_sent,
                round.messages_received,
                round.connections_closed,
                round.burst_messages,
                round.reclaimed,
                round.elapsed,
            )?;
        }
        writeln!(f, "total_messages:        {}", self.total_messages())?;
        writeln!(f, "elapsed:               {:?}", self.elapsed)?;
        write!(f, "{}", self.stats)
    }
}

/// The reply a well-behaved peer would send back for `message`.
fn peer_reply(message: &str) -> Option<String> {
    let (verb, args) = message.split_once(' ').unwrap_or((message, ""));
    match verb {
        "PING" => Some(format!("PONG {}", args)),
        "ECHO" => Some(format!("ECHO_REPLY {}", args)),
        _ => None,
    }
}

/// Runs one round of the workload against `manager`.
///
/// `round` is the zero-based round number; it decides whether this round
/// bursts and reclaims.
pub fn simulate_round<R: Rng>(
    manager: &ConnectionManager,
    round: usize,
    connections: usize,
    messages_per_connection: usize,
    idle_timeout: Duration,
    rng: &mut R,
) -> RoundReport {
    let start = Instant::now();
    let mut report = RoundReport::default();

    let ids: Vec<ConnectionId> = (0..connections)
        .map(|i| {
            let port = 8000u16.wrapping_add(i as u16);
            manager.create_connection(("127.0.0.1", port), ("192.168.1.1", 80))
        })
        .collect();
    report.connections_created = ids.len();

    for &id in &ids {
        if let Ok(true) = manager.establish_connection(id) {
            report.connections_established += 1;
        }
    }

    if !ids.is_empty() {
        for _ in 0..connections * messages_per_connection {
            let (Some(&id), Some(&message)) = (ids.choose(rng), MESSAGE_TYPES.choose(rng)) else {
                break;
            };

            if let Ok(true) = manager.send_message(id, message) {
                report.messages_sent += 1;

                if let Some(reply) = peer_reply(message) {
                    manager.deliver_inbound(id, format!("{}\n", reply).as_bytes());
                    report.messages_received += 1;
                }
            }
        }
    }

    for i in index::sample(rng, ids.len(), ids.len() / 2) {
        if let Ok(true) = manager.close_connection(ids[i]) {
            report.connections_closed += 1;
        }
    }

    if round % RECLAIM_EVERY == 0 {
        report.reclaimed = manager.reclaim_idle(idle_timeout);
    }

    if round % BURST_EVERY == 0 {
        let established: Vec<ConnectionId> = manager
            .ids()
            .into_iter()
            .filter(|&id| manager.state(id) == Ok(ConnectionState::Established))
            .collect();

        if !established.is_empty() {
            for _ in 0..BURST_SIZE {
                let Some(&id) = established.choose(rng) else {
                    break;
                };
                let payload = format!("BURST_DATA_{}", rng.gen_range(1..=1000));
                if let Ok(true) = manager.send_message(id, &payload) {
                    report.burst_messages += 1;
                }
            }
        }
    }

    for id in manager.ids() {
        report.frames_drained += manager.drain_outbound(id).map_or(0, |f| f.len());
        let _ = manager.drain_inbound(id);
    }

    report.elapsed = start.elapsed();
    debug!(
        round,
        created = report.connections_created,
        sent = report.messages_sent,
        closed = report.connections_closed,
        reclaimed = report.reclaimed,
        "Round complete"
    );
    report
}

/// Runs the configured number of rounds and snapshots the statistics.
pub fn run<R: Rng>(
    manager: &ConnectionManager,
    config: &SimulateConfig,
    idle_timeout: Duration,
    rng: &mut R,
) -> SimulationReport {
    info!(
        rounds = config.rounds,
        connections = config.connections,
        messages = config.messages_per_connection,
        "Starting simulation"
    );

    let start = Instant::now();
    let rounds = (0..config.rounds)
        .map(|round| {
            simulate_round(
                manager,
                round,
                config.connections,
                config.messages_per_connection,
                idle_timeout,
                rng,
            )
        })
        .collect();
    let elapsed = start.elapsed();

    let report = SimulationReport {
        rounds,
        stats: manager.statistics(),
        elapsed,
    };
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        messages = report.total_messages(),
        "Simulation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(connections: usize, messages: usize, rounds: usize) -> SimulateConfig {
        SimulateConfig {
            connections,
            messages_per_connection: messages,
            rounds,
        }
    }

    #[test]
    fn test_peer_reply() {
        assert_eq!(peer_reply("PING hello"), Some("PONG hello".to_string()));
        assert_eq!(
            peer_reply("ECHO test message"),
            Some("ECHO_REPLY test message".to_string())
        );
        assert_eq!(peer_reply("DATA sample_data_payload"), None);
    }

    #[test]
    fn test_single_round() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(7);

        // Round 1 neither bursts nor reclaims
        let report = simulate_round(&manager, 1, 10, 3, Duration::from_secs(60), &mut rng);

        assert_eq!(report.connections_created, 10);
        assert_eq!(report.connections_established, 10);
        assert_eq!(report.messages_sent, 30);
        assert!(report.messages_received <= report.messages_sent);
        assert_eq!(report.connections_closed, 5);
        assert_eq!(report.burst_messages, 0);
        assert_eq!(report.reclaimed, 0);

        let stats = manager.statistics();
        assert_eq!(stats.total_connections, 10);
        assert_eq!(stats.active_connections, 5);
        assert_eq!(stats.closed_connections, 5);
        assert_eq!(stats.in_state(ConnectionState::Closed), 5);
        // 3 handshake steps each, plus 4 teardown steps for the closed half
        assert_eq!(stats.state_transitions, 10 * 3 + 5 * 4);
        assert!(stats.bytes_sent > 0);
        assert!(stats.bytes_received > 0);
    }

    #[test]
    fn test_burst_round() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(11);

        let report = simulate_round(&manager, 3, 4, 1, Duration::from_secs(60), &mut rng);

        assert_eq!(report.burst_messages, BURST_SIZE);
        assert_eq!(report.reclaimed, 0);
    }

    #[test]
    fn test_reclaim_round() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(3);

        // Round 0 reclaims, and a zero timeout catches every open connection
        let report = simulate_round(&manager, 0, 6, 2, Duration::ZERO, &mut rng);

        assert_eq!(report.connections_closed, 3);
        assert_eq!(report.reclaimed, 3);
        assert_eq!(report.burst_messages, 0);

        let stats = manager.statistics();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.timed_out_connections, 3);
    }

    #[test]
    fn test_outbound_is_drained() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(5);

        let report = simulate_round(&manager, 1, 3, 2, Duration::from_secs(60), &mut rng);
        assert!(report.frames_drained >= report.messages_sent);

        for id in manager.ids() {
            assert!(manager.drain_outbound(id).unwrap().is_empty());
        }
    }

    #[test]
    fn test_run_accumulates_rounds() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(42);

        let report = run(&manager, &config(8, 3, 4), Duration::from_secs(60), &mut rng);

        assert_eq!(report.rounds.len(), 4);
        assert_eq!(report.stats.total_connections, 32);
        assert_eq!(report.stats.closed_connections, 16);
        assert!(report.total_messages() > 0);
        assert!(report.to_string().contains("total_connections:     32"));
    }

    #[test]
    fn test_empty_round() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(1);

        let report = simulate_round(&manager, 0, 0, 3, Duration::from_secs(60), &mut rng);

        assert_eq!(
            report,
            RoundReport {
                elapsed: report.elapsed,
                ..Default::default()
            }
        );
        assert!(manager.is_empty());
    }

    #[test]
    fn test_peer_replies_are_not_answered() {
        let manager = ConnectionManager::new();
        let mut rng = StdRng::seed_from_u64(7);

        let report = simulate_round(&manager, 1, 1, 10, Duration::from_secs(60), &mut rng);
        assert_eq!(report.messages_sent, 10);
        assert_eq!(report.connections_closed, 0);

        // PONG and ECHO_REPLY from the peer add nothing to the outbox
        let stats = manager.statistics();
        assert_eq!(stats.packets_sent, report.messages_sent as u64);
        assert_eq!(report.frames_drained, report.messages_sent);
    }
}
