//! Configuration
//!
//! Settings come from three places, in order of precedence:
//! command-line flags, an optional TOML file, then built-in defaults.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:7070"
//!
//! [connection]
//! window_size = 65536
//! buffer_size = 8192
//! max_frame_length = 65536
//! unknown_message_policy = "reply"   # or "silent"
//!
//! [reaper]
//! idle_timeout_secs = 60
//! interval_ms = 1000
//! purge_closed = false
//!
//! [latency]
//! min_us = 0
//! max_us = 0
//!
//! [simulate]
//! connections = 32
//! messages_per_connection = 3
//! rounds = 5
//!
//! [logging]
//! level = "info"
//! ```

use crate::connection::{
    ConnectionConfig, Latency, NoLatency, RandomLatency, DEFAULT_BUFFER_SIZE,
    DEFAULT_WINDOW_SIZE,
};
use crate::manager::ReaperConfig;
use crate::protocol::{UnknownMessagePolicy, DEFAULT_MAX_FRAME_LENGTH};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pcbsim")]
#[command(version)]
#[command(about = "Protocol control block simulator: connection state machine and line protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Seconds of inactivity before a connection is reclaimed
    #[arg(short = 't', long, global = true)]
    pub idle_timeout: Option<u64>,

    /// Reply to unrecognized messages or ignore them (reply, silent)
    #[arg(long, global = true)]
    pub unknown_policy: Option<UnknownMessagePolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// What the binary should do.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Accept TCP clients and speak the line protocol with them
    Serve {
        /// Address to bind to (e.g., 127.0.0.1:7070)
        #[arg(short = 'l', long)]
        listen: Option<String>,
    },

    /// Run an in-process workload and print the statistics
    Simulate {
        /// Connections opened per round
        #[arg(short = 'n', long)]
        connections: Option<usize>,

        /// Messages sent per connection
        #[arg(short = 'm', long)]
        messages: Option<usize>,

        /// Number of rounds
        #[arg(short = 'r', long)]
        rounds: Option<usize>,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub reaper: ReaperSection,
    #[serde(default)]
    pub latency: LatencySection,
    #[serde(default)]
    pub simulate: SimulateSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TomlConfig {
    /// Reads and parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Per-connection settings
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    #[serde(default)]
    pub unknown_message_policy: UnknownMessagePolicy,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            buffer_size: default_buffer_size(),
            max_frame_length: default_max_frame_length(),
            unknown_message_policy: UnknownMessagePolicy::default(),
        }
    }
}

/// Idle reclamation settings
#[derive(Debug, Deserialize)]
pub struct ReaperSection {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub purge_closed: bool,
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            interval_ms: default_reaper_interval_ms(),
            purge_closed: false,
        }
    }
}

/// Simulated latency bounds in microseconds. Both zero disables latency.
#[derive(Debug, Deserialize, Default)]
pub struct LatencySection {
    #[serde(default)]
    pub min_us: u64,
    #[serde(default)]
    pub max_us: u64,
}

/// Workload of the `simulate` command
#[derive(Debug, Deserialize)]
pub struct SimulateSection {
    #[serde(default = "default_sim_connections")]
    pub connections: usize,
    #[serde(default = "default_sim_messages")]
    pub messages_per_connection: usize,
    #[serde(default = "default_sim_rounds")]
    pub rounds: usize,
}

impl Default for SimulateSection {
    fn default() -> Self {
        Self {
            connections: default_sim_connections(),
            messages_per_connection: default_sim_messages(),
            rounds: default_sim_rounds(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    crate::DEFAULT_LISTEN.to_string()
}

fn default_window_size() -> u32 {
    DEFAULT_WINDOW_SIZE
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_reaper_interval_ms() -> u64 {
    1000
}

fn default_sim_connections() -> usize {
    32
}

fn default_sim_messages() -> usize {
    3
}

fn default_sim_rounds() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Workload parameters for the `simulate` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulateConfig {
    pub connections: usize,
    pub messages_per_connection: usize,
    pub rounds: usize,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub listen: String,
    pub connection: ConnectionConfig,
    pub reaper: ReaperConfig,
    pub latency_bounds: Option<(Duration, Duration)>,
    pub simulate: SimulateConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merges CLI args over file values. CLI takes precedence.
    pub fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        let (listen, simulate) = match &cli.command {
            Command::Serve { listen } => (
                listen.clone().unwrap_or(file.server.listen),
                SimulateConfig {
                    connections: file.simulate.connections,
                    messages_per_connection: file.simulate.messages_per_connection,
                    rounds: file.simulate.rounds,
                },
            ),
            Command::Simulate {
                connections,
                messages,
                rounds,
            } => (
                file.server.listen,
                SimulateConfig {
                    connections: connections.unwrap_or(file.simulate.connections),
                    messages_per_connection: messages
                        .unwrap_or(file.simulate.messages_per_connection),
                    rounds: rounds.unwrap_or(file.simulate.rounds),
                },
            ),
        };

        let latency_bounds = match (file.latency.min_us, file.latency.max_us) {
            (0, 0) => None,
            (min, max) => Some((Duration::from_micros(min), Duration::from_micros(max))),
        };

        Config {
            command: cli.command,
            listen,
            connection: ConnectionConfig {
                window_size: file.connection.window_size,
                buffer_size: file.connection.buffer_size,
                max_frame_length: file.connection.max_frame_length,
                unknown_message_policy: cli
                    .unknown_policy
                    .unwrap_or(file.connection.unknown_message_policy),
            },
            reaper: ReaperConfig {
                idle_timeout: Duration::from_secs(
                    cli.idle_timeout.unwrap_or(file.reaper.idle_timeout_secs),
                ),
                interval: Duration::from_millis(file.reaper.interval_ms.max(1)),
                purge_closed: file.reaper.purge_closed,
            },
            latency_bounds,
            simulate,
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }

    /// Builds the latency strategy these settings describe.
    pub fn latency(&self) -> Arc<dyn Latency> {
        match self.latency_bounds {
            Some((min, max)) => Arc::new(RandomLatency::new(min, max)),
            None => Arc::new(NoLatency),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::merge(parse(&["pcbsim", "serve"]), TomlConfig::default());

        assert_eq!(config.listen, "127.0.0.1:7070");
        assert_eq!(config.connection, ConnectionConfig::default());
        assert_eq!(config.reaper.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.reaper.interval, Duration::from_secs(1));
        assert!(config.latency_bounds.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_values() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [connection]
            window_size = 1024
            unknown_message_policy = "silent"

            [reaper]
            idle_timeout_secs = 5
            interval_ms = 50
            purge_closed = true

            [latency]
            min_us = 100
            max_us = 1000

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        let config = Config::merge(parse(&["pcbsim", "serve"]), file);

        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.connection.window_size, 1024);
        assert_eq!(config.connection.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(
            config.connection.unknown_message_policy,
            UnknownMessagePolicy::Silent
        );
        assert_eq!(config.reaper.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.reaper.interval, Duration::from_millis(50));
        assert!(config.reaper.purge_closed);
        assert_eq!(
            config.latency_bounds,
            Some((Duration::from_micros(100), Duration::from_micros(1000)))
        );
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            [connection]
            unknown_message_policy = "silent"
            [reaper]
            idle_timeout_secs = 5
            "#,
        )
        .unwrap();

        let cli = parse(&[
            "pcbsim",
            "--idle-timeout",
            "30",
            "--unknown-policy",
            "reply",
            "serve",
            "--listen",
            "127.0.0.1:1234",
        ]);
        let config = Config::merge(cli, file);

        assert_eq!(config.listen, "127.0.0.1:1234");
        assert_eq!(config.reaper.idle_timeout, Duration::from_secs(30));
        assert_eq!(
            config.connection.unknown_message_policy,
            UnknownMessagePolicy::Reply
        );
    }

    #[test]
    fn test_simulate_args() {
        let file: TomlConfig = toml::from_str("[simulate]\nrounds = 9\n").unwrap();
        let config = Config::merge(parse(&["pcbsim", "simulate", "-n", "10", "-m", "4"]), file);

        assert_eq!(
            config.simulate,
            SimulateConfig {
                connections: 10,
                messages_per_connection: 4,
                rounds: 9,
            }
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<TomlConfig>("[bogus]\nx = 1\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = TomlConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
