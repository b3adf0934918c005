//! Command-line argument parsing.

use clap::Parser;

/// Overpass transport node.
#[derive(Parser, Debug, Clone)]
#[command(name = "overpass-node")]
#[command(about = "Overpass transport node binary")]
#[command(version)]
pub struct Cli {
    /// Number of loopback clients to run against the server.
    #[arg(long, default_value_t = 2)]
    pub clients: usize,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub tick_ms: u64,

    /// How long to run, in seconds (0 = until Ctrl+C).
    #[arg(long, default_value_t = 10)]
    pub duration_secs: u64,

    /// Heartbeat ping interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub ping_ms: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
