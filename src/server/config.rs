//! Server Configuration
//!
//! Settings are layered: [`ServerConfig::default`], then environment
//! variables via [`ServerConfig::from_env`], then command-line flags parsed
//! by the binary.
//!
//! | Variable        | Field  |
//! |-----------------|--------|
//! | `WSRELAY_HOST`  | `host` |
//! | `WSRELAY_PORT`  | `port` |
//! | `PORT`          | `port` (when `WSRELAY_PORT` is unset) |

use crate::error::{RelayError, RelayResult};
use std::time::Duration;

/// Default port the relay listens on
pub const DEFAULT_PORT: u16 = 3002;

/// Default host the relay binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Largest accepted per-connection outbound queue
pub const MAX_OUTBOUND_CAPACITY: usize = 1 << 20;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Outbound messages buffered per connection before fan-out drops
    pub outbound_capacity: usize,
    /// Upper bound on the WebSocket upgrade
    pub handshake_timeout: Duration,
    /// How long shutdown waits for connection workers to finish
    pub shutdown_timeout: Duration,
    /// Text sent to every client right after it connects
    pub greeting: Option<String>,
    /// Interval of the health report, `None` disables it
    pub monitor_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            outbound_capacity: 64,
            handshake_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            greeting: None,
            monitor_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> RelayResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ServerConfig::default();

        if let Some(host) = lookup("WSRELAY_HOST").filter(|h| !h.is_empty()) {
            config.host = host;
        }

        let port = lookup("WSRELAY_PORT")
            .map(|value| ("WSRELAY_PORT", value))
            .or_else(|| lookup("PORT").map(|value| ("PORT", value)));
        if let Some((key, value)) = port {
            config.port = parse_port(&value)
                .ok_or_else(|| RelayError::Config(format!("{key}: invalid port '{value}'")))?;
        }

        Ok(config)
    }

    /// Checks settings that cannot come from the environment.
    pub fn validate(&self) -> RelayResult<()> {
        if !(1..=MAX_OUTBOUND_CAPACITY).contains(&self.outbound_capacity) {
            return Err(RelayError::Config(format!(
                "outbound_capacity must be between 1 and {MAX_OUTBOUND_CAPACITY}, got {}",
                self.outbound_capacity
            )));
        }
        Ok(())
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parses a TCP port number, tolerating surrounding whitespace.
pub fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:3002");
        assert_eq!(config.outbound_capacity, 64);
        assert!(config.greeting.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config =
            ServerConfig::from_lookup(lookup(&[("WSRELAY_HOST", "0.0.0.0"), ("PORT", "8080")]))
                .unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");

        let config =
            ServerConfig::from_lookup(lookup(&[("WSRELAY_PORT", "9001"), ("PORT", "8080")]))
                .unwrap();
        assert_eq!(config.port, 9001);
    }

    #[test]
    fn test_empty_environment_is_default() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("PORT"));

        assert!(ServerConfig::from_lookup(lookup(&[("WSRELAY_PORT", "70000")])).is_err());
        assert_eq!(parse_port(" 443 "), Some(443));
    }

    #[test]
    fn test_queue_capacity_bounds() {
        assert!(ServerConfig::default().validate().is_ok());

        for outbound_capacity in [0, MAX_OUTBOUND_CAPACITY + 1, usize::MAX] {
            let config = ServerConfig {
                outbound_capacity,
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, RelayError::Config(_)));
        }

        let config = ServerConfig {
            outbound_capacity: MAX_OUTBOUND_CAPACITY,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
