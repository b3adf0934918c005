//! Transport configuration.

use std::fmt;
use std::time::Duration;

/// Well-known identity of the server role.
pub const SERVER_IDENTITY: &str = "Server";

/// Default topic carrying client-to-server traffic.
pub const DEFAULT_SERVER_TOPIC: &str = "overpass-to-server";

/// Default topic carrying server-to-client traffic.
pub const DEFAULT_CLIENT_TOPIC: &str = "overpass-to-clients";

/// Default interval between heartbeat pings per connection.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(1);

/// Default settle delay before a fresh connection is pinged at all.
pub const DEFAULT_INITIAL_PING_DELAY: Duration = Duration::from_secs(30);

/// Default number of unanswered ping cycles tolerated before disconnect.
pub const DEFAULT_MISSED_PING_DISCONNECT_THRESHOLD: u32 = 3;

/// Default base pause applied once the error threshold is reached.
pub const DEFAULT_ERROR_PAUSE_BASE: Duration = Duration::from_secs(1);

/// Default multiplier applied to the pause on each further failure.
pub const DEFAULT_ERROR_PAUSE_MULTIPLIER: f64 = 2.0;

/// Default number of consecutive failures before pausing begins.
pub const DEFAULT_ERROR_COUNT_THRESHOLD: u32 = 10;

/// Which end of the transport this driver instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single well-known server.
    Server,
    /// One of many clients.
    Client,
}

impl Role {
    /// Check whether this is the server role.
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Configuration for one transport driver instance.
///
/// All tunables are per-instance fields rather than process-wide state, so
/// several drivers (e.g. a server and its clients in one test process) never
/// interfere with each other.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Role of this instance.
    pub role: Role,

    /// Identity of this node; messages whose `d` property differs are
    /// silently dropped.
    pub identity: String,

    /// Identity the client role connects to after bootstrap.
    pub server_identity: String,

    /// Topic carrying client-to-server traffic.
    pub server_topic: String,

    /// Topic carrying server-to-client traffic.
    pub client_topic: String,

    /// Interval between heartbeat pings per connection.
    pub ping_interval: Duration,

    /// Settle delay before a fresh connection is pinged at all.
    pub initial_ping_delay: Duration,

    /// Unanswered ping cycles tolerated before a synthetic disconnect.
    pub missed_ping_disconnect_threshold: u32,

    /// Base pause applied once the error threshold is reached.
    pub error_pause_base: Duration,

    /// Multiplier applied to the pause on each further failure.
    pub error_pause_multiplier: f64,

    /// Consecutive failures before pausing begins.
    pub error_count_threshold: u32,

    /// Master switch for the heartbeat machinery.
    pub ping_enabled: bool,

    /// Reduced mode: answer pings and serve single-shot probes, but run no
    /// periodic heartbeat and no liveness disconnects.
    pub pong_only: bool,
}

impl TransportConfig {
    /// Create a configuration for the given role and identity with defaults.
    pub fn new(role: Role, identity: impl Into<String>) -> Self {
        Self {
            role,
            identity: identity.into(),
            server_identity: SERVER_IDENTITY.to_string(),
            server_topic: DEFAULT_SERVER_TOPIC.to_string(),
            client_topic: DEFAULT_CLIENT_TOPIC.to_string(),
            ping_interval: DEFAULT_PING_INTERVAL,
            initial_ping_delay: DEFAULT_INITIAL_PING_DELAY,
            missed_ping_disconnect_threshold: DEFAULT_MISSED_PING_DISCONNECT_THRESHOLD,
            error_pause_base: DEFAULT_ERROR_PAUSE_BASE,
            error_pause_multiplier: DEFAULT_ERROR_PAUSE_MULTIPLIER,
            error_count_threshold: DEFAULT_ERROR_COUNT_THRESHOLD,
            ping_enabled: true,
            pong_only: false,
        }
    }

    /// Set the topic names.
    pub fn with_topics(mut self, server_topic: impl Into<String>, client_topic: impl Into<String>) -> Self {
        self.server_topic = server_topic.into();
        self.client_topic = client_topic.into();
        self
    }

    /// Set the heartbeat ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the settle delay before heartbeating a new connection.
    pub fn with_initial_ping_delay(mut self, delay: Duration) -> Self {
        self.initial_ping_delay = delay;
        self
    }

    /// Set the missed-ping disconnect threshold.
    pub fn with_missed_ping_disconnect_threshold(mut self, cycles: u32) -> Self {
        self.missed_ping_disconnect_threshold = cycles;
        self
    }

    /// Set the error backoff policy.
    pub fn with_error_backoff(mut self, base: Duration, multiplier: f64, threshold: u32) -> Self {
        self.error_pause_base = base;
        self.error_pause_multiplier = multiplier;
        self.error_count_threshold = threshold;
        self
    }

    /// Enable or disable the heartbeat machinery.
    pub fn with_ping_enabled(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Switch to the reduced pong-only mode.
    pub fn with_pong_only(mut self, pong_only: bool) -> Self {
        self.pong_only = pong_only;
        self
    }

    /// Topic this role consumes from.
    pub fn inbound_topic(&self) -> &str {
        match self.role {
            Role::Server => &self.server_topic,
            Role::Client => &self.client_topic,
        }
    }

    /// Topic this role publishes to.
    pub fn outbound_topic(&self) -> &str {
        match self.role {
            Role::Server => &self.client_topic,
            Role::Client => &self.server_topic,
        }
    }

    /// Subscription name used when opening the consumer.
    pub fn subscription(&self) -> &str {
        &self.identity
    }
}
