//! Server configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use roster_common::protocol::{DEFAULT_IDLE_TIMEOUT, DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for plain-TCP client connections
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address for TLS client connections
    #[serde(default = "default_tls_listen_addr")]
    pub tls_listen_addr: SocketAddr,

    /// TLS certificate configuration; the TLS listener only runs when set
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Seconds of read inactivity before a connection is closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// TLS certificate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to certificate PEM file
    pub cert_path: String,

    /// Path to private key PEM file
    pub key_path: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PLAIN_PORT))
}

fn default_tls_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_TLS_PORT))
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls_listen_addr: default_tls_listen_addr(),
            tls: None,
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, with `ROSTER__`-prefixed environment
    /// variables layered on top. A missing file falls back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let builder = config::Config::builder()
                .add_source(config::File::from(path))
                .add_source(
                    config::Environment::with_prefix("ROSTER")
                        .separator("__")
                        .try_parsing(true),
                );

            let config: ServerConfig = builder.build()?.try_deserialize()?;
            return Ok(config);
        }

        tracing::warn!(
            "configuration file not found at {:?}, using defaults",
            path
        );
        Ok(Self::default())
    }

    /// Read-inactivity bound as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.tls_listen_addr.port(), 9001);
        assert!(config.tls.is_none());
        assert_eq!(config.idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ServerConfig::load(Path::new("/nonexistent/roster.toml")).unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
    }
}
