#![forbid(unsafe_code)]

// Process configuration, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DEPARTURE_GRACE_MS: u64 = 1500;
const DEFAULT_RATE_LIMIT_PER_SEC: u64 = 100;

/// Server-wide settings. Everything has a default so the server starts with an empty environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Concurrent WebSocket connections admitted before upgrades are refused
    pub max_connections: usize,
    /// Close a connection if nothing arrives within this duration
    pub idle_timeout: Duration,
    /// Delay between an abrupt disconnect and finalized departure
    pub departure_grace: Duration,
    /// Token bucket refill rate and burst size, per connection
    pub rate_limit_per_sec: u64,
    /// HS256 secret for identity tokens; `None` disables token identities
    pub jwt_secret: Option<String>,
    /// Bearer token guarding `/metrics`
    pub metrics_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            departure_grace: Duration::from_millis(DEFAULT_DEPARTURE_GRACE_MS),
            rate_limit_per_sec: DEFAULT_RATE_LIMIT_PER_SEC,
            jwt_secret: None,
            metrics_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut max_connections = parse_or(&lookup, "MAX_CONNECTIONS", defaults.max_connections);
        if max_connections == 0 {
            warn!("MAX_CONNECTIONS=0 would reject all connections, using default {}", DEFAULT_MAX_CONNECTIONS);
            max_connections = DEFAULT_MAX_CONNECTIONS;
        }

        let mut rate_limit_per_sec = parse_or(&lookup, "RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec);
        if rate_limit_per_sec == 0 {
            warn!("RATE_LIMIT_PER_SEC=0 would drop every message, using default {}", DEFAULT_RATE_LIMIT_PER_SEC);
            rate_limit_per_sec = DEFAULT_RATE_LIMIT_PER_SEC;
        }

        Self {
            port: parse_or(&lookup, "PORT", defaults.port),
            max_connections,
            idle_timeout: Duration::from_secs(parse_or(&lookup, "IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)),
            departure_grace: Duration::from_millis(parse_or(&lookup, "DEPARTURE_GRACE_MS", DEFAULT_DEPARTURE_GRACE_MS)),
            rate_limit_per_sec,
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.is_empty()),
            metrics_token: lookup("METRICS_TOKEN").filter(|s| !s.is_empty()),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}, using default", key, raw);
                default
            }
        },
        None => default,
    }
}
