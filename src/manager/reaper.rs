//! Background Idle Reaper
//!
//! This module implements a background task that periodically force-closes
//! connections that have gone idle. Connections can always be reclaimed by
//! calling [`ConnectionManager::reclaim_idle`] directly; the reaper just does
//! it on a timer.
//!
//! ## Design
//!
//! The reaper runs as a Tokio task and:
//! 1. Sleeps for the configured interval
//! 2. Wakes up and reclaims every connection idle past the timeout, on the
//!    blocking pool
//! 3. Optionally purges connections that reached `CLOSED`
//! 4. Logs how many connections were reclaimed
//!
//! Dropping the [`IdleReaper`] handle stops the task.

use crate::manager::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Configuration for the idle reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How long a connection may stay idle before it is reclaimed (default: 60s)
    pub idle_timeout: Duration,

    /// Interval between passes (default: 1s)
    pub interval: Duration,

    /// Remove closed connections after each pass (default: false)
    pub purge_closed: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
            purge_closed: false,
        }
    }
}

/// A handle to the running idle reaper.
///
/// When this handle is dropped, the reaper task will be stopped.
#[derive(Debug)]
pub struct IdleReaper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl IdleReaper {
    /// Starts the reaper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use pcbsim::manager::{ConnectionManager, IdleReaper, ReaperConfig};
    /// use std::sync::Arc;
    ///
    /// let manager = Arc::new(ConnectionManager::new());
    /// let reaper = IdleReaper::start(Arc::clone(&manager), ReaperConfig::default());
    ///
    /// // Idle connections are reclaimed in the background...
    ///
    /// drop(reaper);
    /// ```
    pub fn start(manager: Arc<ConnectionManager>, config: ReaperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            interval_ms = config.interval.as_millis() as u64,
            "Idle reaper started"
        );
        tokio::spawn(reaper_loop(manager, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the reaper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Idle reaper stopped");
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main reaper loop.
async fn reaper_loop(
    manager: Arc<ConnectionManager>,
    config: ReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Idle reaper received shutdown signal");
                    return;
                }
            }
        }

        // Forced closes may sleep for simulated latency
        let pass = {
            let manager = Arc::clone(&manager);
            let (idle_timeout, purge) = (config.idle_timeout, config.purge_closed);
            tokio::task::spawn_blocking(move || {
                let reclaimed = manager.reclaim_idle(idle_timeout);
                let purged = if purge { manager.purge_closed() } else { 0 };
                (reclaimed, purged)
            })
        };

        match pass.await {
            Ok((reclaimed, purged)) => {
                if reclaimed > 0 || purged > 0 {
                    debug!(reclaimed, purged, "Idle connections reclaimed");
                }
            }
            Err(e) => warn!(error = %e, "Reaper pass failed"),
        }
    }
}

/// Starts the reaper with the given idle timeout and default interval.
pub fn start_idle_reaper(manager: Arc<ConnectionManager>, idle_timeout: Duration) -> IdleReaper {
    IdleReaper::start(
        manager,
        ReaperConfig {
            idle_timeout,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;

    #[tokio::test]
    async fn test_reaper_reclaims_idle_connections() {
        let manager = Arc::new(ConnectionManager::new());
        let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
        manager.establish_connection(id).unwrap();

        let config = ReaperConfig {
            idle_timeout: Duration::from_millis(20),
            interval: Duration::from_millis(10),
            purge_closed: false,
        };
        let _reaper = IdleReaper::start(Arc::clone(&manager), config);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.state(id), Ok(ConnectionState::Closed));
        assert_eq!(manager.statistics().timed_out_connections, 1);
    }

    #[tokio::test]
    async fn test_reaper_spares_active_connections() {
        let manager = Arc::new(ConnectionManager::new());
        let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
        manager.establish_connection(id).unwrap();

        let config = ReaperConfig {
            idle_timeout: Duration::from_secs(30),
            interval: Duration::from_millis(10),
            purge_closed: false,
        };
        let _reaper = IdleReaper::start(Arc::clone(&manager), config);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(manager.state(id), Ok(ConnectionState::Established));
        assert_eq!(manager.statistics().timed_out_connections, 0);
    }

    #[tokio::test]
    async fn test_reaper_purges_when_configured() {
        let manager = Arc::new(ConnectionManager::new());
        let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
        manager.establish_connection(id).unwrap();

        let config = ReaperConfig {
            idle_timeout: Duration::from_millis(20),
            interval: Duration::from_millis(10),
            purge_closed: true,
        };
        let _reaper = IdleReaper::start(Arc::clone(&manager), config);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!manager.contains(id));
        let stats = manager.statistics();
        assert_eq!(stats.timed_out_connections, 1);
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.current_connections, 0);
    }

    #[tokio::test]
    async fn test_reaper_stops_on_drop() {
        let manager = Arc::new(ConnectionManager::new());

        let config = ReaperConfig {
            idle_timeout: Duration::from_millis(10),
            interval: Duration::from_millis(10),
            purge_closed: false,
        };

        {
            let _reaper = IdleReaper::start(Arc::clone(&manager), config);
            tokio::time::sleep(Duration::from_millis(30)).await;
            // Reaper is dropped here
        }

        let id = manager.create_connection(("127.0.0.1", 8000), ("10.0.0.1", 80));
        manager.establish_connection(id).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nobody reclaims it anymore
        assert_eq!(manager.state(id), Ok(ConnectionState::Established));
    }
}
