//! chart-mirror Core - Shared Types
//!
//! Error taxonomy, run configuration, platform descriptors and the explicit
//! logging context used across the chart-mirror workspace.

pub mod config;
pub mod context;
pub mod error;
pub mod platform;

// Re-export commonly used types
pub use config::{
    EvictionPolicy, LogLevel, MirrorConfig, RegistryCredentials, RetryConfig, TimeoutConfig,
    TransferMode,
};
pub use context::MirrorContext;
pub use error::{FailureClass, MirrorError, Result};
pub use platform::{PlatformPolicy, PlatformSpec};

/// chart-mirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
