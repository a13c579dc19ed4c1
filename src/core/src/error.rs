use thiserror::Error;

/// Tool output fragment that marks a push rejected for lacking a concrete platform.
const MISSING_PLATFORM_MARKER: &str = "does not provide any platform";

/// chart-mirror error types
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Login to a registry host failed
    #[error("Authentication failed: {registry} - {message}")]
    AuthenticationFailure { registry: String, message: String },

    /// Could not determine a concrete platform or digest
    #[error("Resolution failed for {reference}: {message}")]
    ResolutionFailure { reference: String, message: String },

    /// A recovery tier gave up on an image
    #[error("Transfer failed at tier {tier}: {message}")]
    TransferFailure { tier: u8, message: String },

    /// The registry transfer tool reported a failure
    #[error("Tool error: {operation} - {message}")]
    ToolError { operation: String, message: String },

    /// An external call exceeded its timeout
    #[error("Timeout: {operation} exceeded {seconds}s")]
    TimeoutFailure { operation: String, seconds: u64 },

    /// Registry management API error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Malformed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse failure taxonomy recorded on every failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    Authentication,
    Resolution,
    Transfer,
    Timeout,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Resolution => write!(f, "resolution"),
            Self::Transfer => write!(f, "transfer"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

impl MirrorError {
    /// Map this error onto the transfer failure taxonomy.
    ///
    /// Anything that is not an authentication, resolution or timeout problem
    /// counts as a transfer failure of the tier it happened in.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AuthenticationFailure { .. } => FailureClass::Authentication,
            Self::ResolutionFailure { .. } | Self::InvalidReference(_) => {
                FailureClass::Resolution
            }
            Self::TimeoutFailure { .. } => FailureClass::Timeout,
            _ => FailureClass::Transfer,
        }
    }

    /// True when the destination rejected the artifact because it carries no
    /// concrete `{os, architecture}`, typically a pushed manifest list stub.
    pub fn is_missing_platform(&self) -> bool {
        match self {
            Self::ToolError { message, .. } | Self::TransferFailure { message, .. } => {
                message.contains(MISSING_PLATFORM_MARKER)
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::SerializationError(err.to_string())
    }
}

/// Result type alias for chart-mirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;
