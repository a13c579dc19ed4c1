//! Platform descriptors and the platform selection policy.

use serde::{Deserialize, Serialize};

/// A concrete `{os, architecture}` pair, written `os/arch`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub os: String,
    pub architecture: String,
}

impl PlatformSpec {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
        }
    }

    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64")
    }

    /// Exact match on both `os` and `architecture`.
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        self.os == os && self.architecture == architecture
    }
}

impl std::fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

impl std::str::FromStr for PlatformSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('/') {
            Some((os, arch))
                if !os.is_empty() && !arch.is_empty() && !arch.contains('/') =>
            {
                Ok(Self::new(os, arch))
            }
            _ => Err(format!("invalid platform '{}': expected os/arch", s)),
        }
    }
}

/// How the platform of a pulled image is chosen.
///
/// `Auto` is a policy, not a platform: it is evaluated against the trial
/// sequence `[unspecified, linux/amd64, linux/arm64]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlatformPolicy {
    #[default]
    Auto,
    Explicit(PlatformSpec),
}

impl PlatformPolicy {
    /// The platform used whenever a single concrete platform is required.
    pub fn explicit_or_default(&self) -> PlatformSpec {
        match self {
            Self::Auto => PlatformSpec::linux_amd64(),
            Self::Explicit(platform) => platform.clone(),
        }
    }
}

impl std::fmt::Display for PlatformPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Explicit(platform) => write!(f, "{}", platform),
        }
    }
}

impl std::str::FromStr for PlatformPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Explicit)
        }
    }
}

impl TryFrom<String> for PlatformPolicy {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlatformPolicy> for String {
    fn from(policy: PlatformPolicy) -> Self {
        policy.to_string()
    }
}
