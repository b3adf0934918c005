//! Node configuration.

use std::time::Duration;

use overpass_transport::{Role, TransportConfig, SERVER_IDENTITY};

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Number of loopback clients.
    pub clients: usize,

    /// Tick interval for every driver.
    pub tick: Duration,

    /// Run duration; `None` runs until a shutdown signal.
    pub duration: Option<Duration>,

    /// Heartbeat ping interval.
    pub ping_interval: Duration,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        let duration = if cli.duration_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(cli.duration_secs))
        };

        Self {
            clients: cli.clients,
            tick: Duration::from_millis(cli.tick_ms),
            duration,
            ping_interval: Duration::from_millis(cli.ping_ms),
            log_level: cli.log_level.clone(),
        }
    }

    /// Transport configuration for the server driver.
    pub fn server_config(&self) -> TransportConfig {
        TransportConfig::new(Role::Server, SERVER_IDENTITY)
            .with_ping_interval(self.ping_interval)
            .with_initial_ping_delay(Duration::ZERO)
    }

    /// Transport configuration for the nth client driver.
    ///
    /// Loopback runs want RTT samples right away, so the settle delay is
    /// dropped to zero.
    pub fn client_config(&self, index: usize) -> TransportConfig {
        TransportConfig::new(Role::Client, format!("Client-{index}"))
            .with_ping_interval(self.ping_interval)
            .with_initial_ping_delay(Duration::ZERO)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            clients: 2,
            tick: Duration::from_millis(50),
            duration: Some(Duration::from_secs(10)),
            ping_interval: Duration::from_secs(1),
            log_level: "info".to_string(),
        }
    }
}
