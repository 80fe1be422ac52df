use std::str::FromStr;
use std::time::Duration;

/// Realtime server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Redis connection string for the pub/sub broker.
    pub redis_url: String,
    /// Base URL of the backend API that owns users and conversations
    /// (e.g. `http://localhost:4000/api/v1`).
    pub server_api_url: String,
    /// Shared secret for the internal trigger endpoint and backend calls.
    pub internal_secret: String,
    /// How often unanswered calls are swept.
    pub call_sweep_interval: Duration,
    /// A socket silent for longer than this is closed.
    pub heartbeat_timeout: Duration,
    /// Per-connection outbound queue depth before events are dropped.
    pub outbound_queue_capacity: usize,
    /// Upper bound on any single backend call.
    pub backend_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT", 5000),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            server_api_url: std::env::var("SERVER_API_URL")
                .unwrap_or_else(|_| "http://localhost:4000/api/v1".to_string()),
            internal_secret: required_var("INTERNAL_SECRET_KEY"),
            call_sweep_interval: Duration::from_secs(
                parsed_var::<u64>("CALL_SWEEP_INTERVAL_SECS", 10).max(1),
            ),
            heartbeat_timeout: Duration::from_secs(parsed_var("HEARTBEAT_TIMEOUT_SECS", 90)),
            outbound_queue_capacity: parsed_var("OUTBOUND_QUEUE_CAPACITY", 256),
            backend_timeout: Duration::from_millis(
                parsed_var::<u64>("BACKEND_TIMEOUT_MS", 5000).max(1),
            ),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| panic!("{name} env var is required"))
}

fn parsed_var<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
