//! Configuration management for the roadbook gate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GateError, Result};
use crate::ratelimit::{
    RateLimitSettings, DEFAULT_BURST_CAPACITY, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_ENTRIES,
    DEFAULT_REFILL_RATE, DEFAULT_TTL,
};

/// Prefix for environment overrides, e.g. `ROADBOOK__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "ROADBOOK";

/// Main configuration for the gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Origins echoed back in `Access-Control-Allow-Origin`
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable this behind a reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_origins: Vec::new(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Steady-state requests per second allowed per client
    #[serde(default = "default_refill_rate")]
    pub refill_rate_per_second: f64,

    /// Requests a client may burst before being throttled
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,

    /// Idle seconds after which a client's state may be dropped
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Minimum seconds between idle-state sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Tracked client count that forces a sweep
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            refill_rate_per_second: default_refill_rate(),
            burst_capacity: default_burst_capacity(),
            ttl_secs: default_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_refill_rate() -> f64 {
    DEFAULT_REFILL_RATE
}

fn default_burst_capacity() -> u32 {
    DEFAULT_BURST_CAPACITY
}

fn default_ttl() -> u64 {
    DEFAULT_TTL.as_secs()
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl RateLimitingConfig {
    /// Validate the values and convert them into registry settings.
    pub fn to_settings(&self) -> Result<RateLimitSettings> {
        if !self.refill_rate_per_second.is_finite() || self.refill_rate_per_second <= 0.0 {
            return Err(GateError::Config(format!(
                "refill_rate_per_second must be a positive number, got {}",
                self.refill_rate_per_second
            )));
        }
        if self.burst_capacity == 0 {
            return Err(GateError::Config(
                "burst_capacity must be at least 1".to_string(),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(GateError::Config("ttl_secs must be at least 1".to_string()));
        }
        if self.max_entries == 0 {
            return Err(GateError::Config(
                "max_entries must be at least 1".to_string(),
            ));
        }

        Ok(RateLimitSettings {
            refill_rate: self.refill_rate_per_second,
            burst_capacity: self.burst_capacity,
            ttl: Duration::from_secs(self.ttl_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            max_entries: self.max_entries,
        })
    }
}

impl GateConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    ///
    /// Environment variables use the `ROADBOOK__` prefix and `__` as the
    /// nesting separator; `allowed_origins` takes a comma-separated list.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder
                .add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        let config: GateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins"),
            )
            .build()?
            .try_deserialize()?;

        config.rate_limiting.to_settings()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.rate_limiting.to_settings()?;
        Ok(config)
    }
}
