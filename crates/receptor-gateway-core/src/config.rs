//! Gateway configuration.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV_VAR: &str = "RECEPTOR_GATEWAY_CONFIG";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level gateway configuration.
///
/// Every field has a default, so an empty file is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub queues: QueueConfig,
    pub timeouts: TimeoutConfig,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the agent and management listeners bind to.
    pub listen_addr: SocketAddr,
    /// Header carrying the tenant of an incoming agent connection.
    pub tenant_header: String,
    /// Maximum accepted management request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tenant_header: "x-receptor-tenant".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Per-session channel bounds.
///
/// The data channel bound is the backpressure point for job dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub data_capacity: usize,
    pub control_capacity: usize,
    pub error_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_capacity: 64,
            control_capacity: 16,
            error_capacity: 8,
        }
    }
}

/// Deadlines in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub dispatch_ms: u64,
    pub ping_ms: u64,
    pub capabilities_ms: u64,
    pub handshake_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dispatch_ms: 5_000,
            ping_ms: 10_000,
            capabilities_ms: 2_000,
            handshake_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn dispatch(&self) -> Duration {
        Duration::from_millis(self.dispatch_ms)
    }

    #[must_use]
    pub const fn ping(&self) -> Duration {
        Duration::from_millis(self.ping_ms)
    }

    #[must_use]
    pub const fn capabilities(&self) -> Duration {
        Duration::from_millis(self.capabilities_ms)
    }

    #[must_use]
    pub const fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is malformed or fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from the file named by `RECEPTOR_GATEWAY_CONFIG`, or defaults.
    ///
    /// # Errors
    /// Returns error if the variable is set and the file is unusable.
    pub fn discover() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                let path = PathBuf::from(path);
                tracing::debug!(path = %path.display(), "loading config");
                Self::load(&path)
            }
            None => {
                tracing::debug!("{CONFIG_ENV_VAR} not set, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Check invariants serde can't express.
    ///
    /// # Errors
    /// Returns `Invalid` on zero-sized queues or an empty tenant header.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let queues = &self.queues;
        if queues.data_capacity == 0 || queues.control_capacity == 0 || queues.error_capacity == 0
        {
            return Err(ConfigError::Invalid(
                "queue capacities must be greater than zero".into(),
            ));
        }
        if self.server.tenant_header.trim().is_empty() {
            return Err(ConfigError::Invalid("tenant_header must not be empty".into()));
        }
        Ok(())
    }
}
