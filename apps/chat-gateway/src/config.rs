use std::time::Duration;

/// Chat gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// HS256 secret used to verify handshake tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. Messages are kept in memory when unset.
    pub database_url: Option<String>,
    /// Redis connection string. Presence, the append log and the fan-out
    /// broker are process-local when unset.
    pub redis_url: Option<String>,
    /// Snowflake worker id for message ids issued by this process.
    pub worker_id: u16,
    /// Per-session outbound queue capacity; a full queue evicts the session.
    pub outbound_queue_capacity: usize,
    pub live_rate: RateSettings,
    pub private_rate: RateSettings,
    /// Append log retention by count, per room.
    pub replay_max_entries: usize,
    /// Append log retention by age.
    pub replay_retention_secs: u64,
    /// TTL applied to viewer counts, pins, sequences and presence keys.
    pub room_state_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateSettings {
    pub max_requests: u32,
    pub window: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: parsed_var("PORT", 4100),
            jwt_secret: required_var("JWT_SECRET"),
            database_url: optional_var("DATABASE_URL"),
            redis_url: optional_var("REDIS_URL"),
            worker_id: parsed_var("WORKER_ID", 0),
            outbound_queue_capacity: parsed_var("OUTBOUND_QUEUE_CAPACITY", 256),
            live_rate: RateSettings {
                max_requests: parsed_var("LIVE_RATE_MAX", 5),
                window: Duration::from_millis(parsed_var("LIVE_RATE_WINDOW_MS", 1000)),
            },
            private_rate: RateSettings {
                max_requests: parsed_var("PRIVATE_RATE_MAX", 20),
                window: Duration::from_millis(parsed_var("PRIVATE_RATE_WINDOW_MS", 1000)),
            },
            replay_max_entries: parsed_var("REPLAY_MAX_ENTRIES", 1000),
            replay_retention_secs: parsed_var("REPLAY_RETENTION_SECS", 86_400),
            room_state_ttl_secs: parsed_var("ROOM_STATE_TTL_SECS", 86_400),
        }
    }

    /// Defaults suitable for tests and local runs, with in-memory backends.
    pub fn local(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 4100,
            jwt_secret: jwt_secret.into(),
            database_url: None,
            redis_url: None,
            worker_id: 0,
            outbound_queue_capacity: 256,
            live_rate: RateSettings {
                max_requests: 5,
                window: Duration::from_secs(1),
            },
            private_rate: RateSettings {
                max_requests: 20,
                window: Duration::from_secs(1),
            },
            replay_max_entries: 1000,
            replay_retention_secs: 86_400,
            room_state_ttl_secs: 86_400,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
