//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Knowledge backend settings.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;

        if t.port == 0 {
            return Err(invalid("transport.port must be non-zero"));
        }
        if t.session_idle_timeout_secs == 0 {
            return Err(invalid("transport.session_idle_timeout_secs must be non-zero"));
        }
        if t.sweep_interval_secs == 0 {
            return Err(invalid("transport.sweep_interval_secs must be non-zero"));
        }
        if t.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(invalid("transport.allowed_origins cannot contain empty entries"));
        }
        if t.allow_credentials && t.allows_any_origin() {
            return Err(invalid(
                "transport.allow_credentials cannot be combined with the \"*\" origin",
            ));
        }
        if self.limits.tool_timeout_secs == 0 {
            return Err(invalid("limits.tool_timeout_secs must be non-zero"));
        }
        if self.limits.max_concurrent_requests == 0 {
            return Err(invalid("limits.max_concurrent_requests must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError {
        message: message.to_string(),
    }
}

/// Which transport the server runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    #[default]
    Stdio,
    /// HTTP with server-sent events, many concurrent sessions.
    Http,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Transport to run.
    #[serde(default)]
    pub mode: TransportMode,

    /// Interface the HTTP transport binds to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the HTTP transport binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by the CORS policy. `"*"` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Whether cross-origin requests may carry credentials.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Idle time after which an HTTP session is expired.
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    /// How often idle sessions are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl TransportConfig {
    /// Returns `true` if the origin list contains the wildcard.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Idle window as a [`Duration`].
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Sweep period as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            allow_credentials: false,
            session_idle_timeout_secs: default_session_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    5001
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

const fn default_session_idle_timeout() -> u64 {
    1800
}

const fn default_sweep_interval() -> u64 {
    60
}

/// Limits protecting downstream collaborators.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Per tool call timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Maximum number of requests handled at the same time.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl LimitsConfig {
    /// Tool timeout as a [`Duration`].
    #[must_use]
    pub const fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

const fn default_tool_timeout() -> u64 {
    30
}

const fn default_max_concurrent_requests() -> usize {
    64
}

/// Knowledge backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeConfig {
    /// JSON file with collections and documents to load at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,

    /// Probe latency above which a component is reported as degraded.
    #[serde(default = "default_slow_probe_threshold")]
    pub slow_probe_threshold_ms: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            seed_file: None,
            slow_probe_threshold_ms: default_slow_probe_threshold(),
        }
    }
}

const fn default_slow_probe_threshold() -> u64 {
    500
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
