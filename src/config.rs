//! Configuration management for Tollgate.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, and `TOLLGATE__`-prefixed environment variables such as
//! `TOLLGATE__LIMITER__BURST=10`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{BucketConfig, ReclaimPolicy};

/// Prefix of environment variables that override configuration values.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token bucket parameters
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Idle client reclamation
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8888))
}

/// Token bucket parameters shared by every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tokens added per second; zero admits nothing
    #[serde(default = "default_refill_rate")]
    pub refill_rate: f64,

    /// Bucket capacity, i.e. the largest burst a client may send at once
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Use the sharded client map instead of a single locked map
    #[serde(default)]
    pub sharded: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            refill_rate: default_refill_rate(),
            burst: default_burst(),
            sharded: false,
        }
    }
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    5
}

impl LimiterConfig {
    /// The validated bucket parameters.
    pub fn bucket(&self) -> Result<BucketConfig> {
        BucketConfig::new(self.refill_rate, self.burst)
    }
}

/// Idle client reclamation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds a client may go unchecked before it is evicted
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            max_idle_secs: default_max_idle(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_idle() -> u64 {
    180
}

impl ReclaimConfig {
    /// The validated reclamation policy.
    pub fn policy(&self) -> Result<ReclaimPolicy> {
        ReclaimPolicy::new(
            Duration::from_secs(self.sweep_interval_secs),
            Duration::from_secs(self.max_idle_secs),
        )
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file and the environment.
    ///
    /// A missing file is an error only when a path was given explicitly.
    /// The result is not validated, so that command-line overrides can still
    /// be applied; call [`validate`](Self::validate) once they are.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value that would otherwise fail at start-up.
    pub fn validate(&self) -> Result<()> {
        self.limiter.bucket()?;
        self.reclaim.policy()?;
        Ok(())
    }
}
