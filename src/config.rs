//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LimiterError, Result};
use crate::ratelimit::{LimitSettings, MAX_WINDOW};

/// Prefix for environment overrides, e.g. `RATEWARDEN__LIMITS__QUOTA=100`.
const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewardenConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store URL (`redis://host:port/db`, or `memory://` for a process-local store)
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle connections older than this are evicted on the next checkout
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Bound on waiting for, creating, or recycling a pooled connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Bound on every store round trip made by the limiter
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

impl StoreConfig {
    /// Whether the URL selects the in-memory store.
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_connections() -> usize {
    40
}

fn default_idle_timeout() -> u64 {
    240
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_operation_timeout() -> u64 {
    500
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests allowed per window for each identifier
    #[serde(default = "default_quota")]
    pub quota: u64,

    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Root segment of every bucket key
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            quota: default_quota(),
            window_secs: default_window(),
            namespace: default_namespace(),
        }
    }
}

impl LimitsConfig {
    /// Build limiter settings, taking the operation timeout from the store section.
    pub fn settings(&self, store: &StoreConfig) -> LimitSettings {
        LimitSettings {
            quota: self.quota,
            window: Duration::from_secs(self.window_secs),
            operation_timeout: Duration::from_millis(store.operation_timeout_ms),
            namespace: self.namespace.clone(),
        }
    }
}

fn default_quota() -> u64 {
    5000
}

fn default_window() -> u64 {
    3600
}

fn default_namespace() -> String {
    "RateLimit".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RatewardenConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatewardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| LimiterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then the optional file, then `RATEWARDEN__*` environment overrides.
    ///
    /// Not validated: callers layer their own overrides on top and then call
    /// [`RatewardenConfig::validate`].
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RatewardenConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limits.quota == 0 {
            return Err(LimiterError::Config("limits.quota must be positive".to_string()));
        }
        if self.limits.window_secs == 0 {
            return Err(LimiterError::Config("limits.window_secs must be positive".to_string()));
        }
        if self.limits.window_secs > MAX_WINDOW.as_secs() {
            return Err(LimiterError::Config(format!(
                "limits.window_secs must not exceed {}",
                MAX_WINDOW.as_secs()
            )));
        }
        if self.limits.namespace.is_empty() {
            return Err(LimiterError::Config("limits.namespace must not be empty".to_string()));
        }
        if self.store.max_connections == 0 {
            return Err(LimiterError::Config("store.max_connections must be positive".to_string()));
        }
        if self.store.operation_timeout_ms == 0 {
            return Err(LimiterError::Config(
                "store.operation_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
