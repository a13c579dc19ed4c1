use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MirrorError, Result};
use crate::platform::PlatformPolicy;

/// Mirror run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Destination registry host, optionally with a port
    pub target_registry: String,

    /// Path prefix under the destination registry (e.g. "team/mirror")
    pub repository_prefix: Option<String>,

    /// Platform selection policy
    pub platform: PlatformPolicy,

    /// Per-tier retry settings
    pub retry: RetryConfig,

    /// External call timeouts
    pub timeouts: TimeoutConfig,

    /// How Tier 1 moves an image
    pub transfer_mode: TransferMode,

    /// Whether Tier 4 may delete a remote tag
    pub eviction: EvictionPolicy,

    /// Working directory for temporary image archives
    pub work_dir: PathBuf,

    /// Sandboxed DOCKER_CONFIG directory for the transfer tool
    pub docker_config_dir: Option<PathBuf>,

    /// Static credentials keyed by registry host
    pub credentials: HashMap<String, RegistryCredentials>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            target_registry: String::new(),
            repository_prefix: None,
            platform: PlatformPolicy::Auto,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            transfer_mode: TransferMode::PullPush,
            eviction: EvictionPolicy::DigestMismatch,
            work_dir: std::env::temp_dir().join("chart-mirror"),
            docker_config_dir: None,
            credentials: HashMap::new(),
            log_level: LogLevel::Info,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from a YAML file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Validate once at entry. Everything downstream trusts these fields.
    pub fn validate(&self) -> Result<()> {
        let registry = self.target_registry.trim();
        if registry.is_empty() {
            return Err(MirrorError::ConfigError(
                "target_registry is required".to_string(),
            ));
        }
        if registry.contains("://") {
            return Err(MirrorError::ConfigError(format!(
                "target_registry '{}' must be a host, not a URL",
                registry
            )));
        }
        if registry.ends_with('/') || registry.contains(char::is_whitespace) {
            return Err(MirrorError::ConfigError(format!(
                "target_registry '{}' is not a valid registry host",
                registry
            )));
        }
        if let Some(prefix) = &self.repository_prefix {
            if prefix.starts_with('/') || prefix.ends_with('/') {
                return Err(MirrorError::ConfigError(format!(
                    "repository_prefix '{}' must not start or end with '/'",
                    prefix
                )));
            }
        }
        if self.retry.budget == 0 {
            return Err(MirrorError::ConfigError(
                "retry.budget must be at least 1".to_string(),
            ));
        }
        if self.timeouts.command_secs == 0 || self.timeouts.registry_secs == 0 {
            return Err(MirrorError::ConfigError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Non-empty repository prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.repository_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Retry settings applied inside each recovery tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per tier
    pub budget: u32,

    /// Fixed delay between attempts, in seconds
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: 3,
            delay_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Timeouts for external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Each transfer tool invocation
    pub command_secs: u64,

    /// Each registry management API call
    pub registry_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 120,
            registry_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn registry(&self) -> Duration {
        Duration::from_secs(self.registry_secs)
    }
}

/// Tier 1 transfer strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferMode {
    /// Pull locally, tag, push
    #[default]
    PullPush,
    /// Registry-to-registry copy
    Copy,
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pull-push" => Ok(Self::PullPush),
            "copy" => Ok(Self::Copy),
            _ => Err(format!("unknown transfer mode: '{}' (supported: pull-push, copy)", s)),
        }
    }
}

/// Gate for deleting a remote destination tag before the final retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Never delete remote tags
    Never,
    /// Delete only when the remote tag's digest differs from every source digest
    #[default]
    DigestMismatch,
    /// Delete unconditionally
    Always,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "digest-mismatch" => Ok(Self::DigestMismatch),
            "always" => Ok(Self::Always),
            _ => Err(format!(
                "unknown eviction policy: '{}' (supported: never, digest-mismatch, always)",
                s
            )),
        }
    }
}

/// Static credentials for one registry host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
