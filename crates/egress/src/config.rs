//! Egress configuration

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/relay-egress.sock";

/// Default process-wide subscription cap
const DEFAULT_MAX_SUBSCRIPTIONS: i64 = 500;

/// Default per-subscription buffer depth
const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// Default per-subscription dispatch channel depth
const DEFAULT_DISPATCH_DEPTH: usize = 256;

/// Egress server configuration
///
/// # Example
///
/// ```toml
/// [egress]
/// socket_path = "/run/relay/egress.sock"
/// max_subscriptions = 500
/// buffer_capacity = 10000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Path to the Unix socket consumers connect to
    pub socket_path: PathBuf,

    /// Process-wide cap on concurrent subscriptions
    pub max_subscriptions: i64,

    /// Per-subscription buffer depth; larger smooths bursts, smaller
    /// reduces tail latency
    pub buffer_capacity: usize,

    /// Depth of each dispatcher channel feeding a subscription
    pub dispatch_depth: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dispatch_depth: DEFAULT_DISPATCH_DEPTH,
        }
    }
}

impl EgressConfig {
    /// Create config with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.socket_path = path.as_ref().to_path_buf();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EgressConfig::default();
        assert_eq!(config.socket_path.to_str().unwrap(), DEFAULT_SOCKET_PATH);
        assert_eq!(config.max_subscriptions, 500);
        assert_eq!(config.buffer_capacity, 10_000);
        assert_eq!(config.dispatch_depth, 256);
    }

    #[test]
    fn test_config_with_socket_path() {
        let config = EgressConfig::default().with_socket_path("/tmp/custom.sock");
        assert_eq!(config.socket_path.to_str().unwrap(), "/tmp/custom.sock");
    }

    #[test]
    fn test_deserialize_empty() {
        let config: EgressConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_subscriptions, 500);
        assert_eq!(config.buffer_capacity, 10_000);
    }

    #[test]
    fn test_deserialize_partial() {
        let toml = r#"
socket_path = "/run/relay/egress.sock"
max_subscriptions = 64
"#;
        let config: EgressConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.socket_path.to_str().unwrap(), "/run/relay/egress.sock");
        assert_eq!(config.max_subscriptions, 64);
        assert_eq!(config.buffer_capacity, 10_000);
    }
}
