//! Transfer attempt records and per-image results.

use chart_mirror_core::error::{FailureClass, MirrorError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest diagnostic carried in a summary line.
const SUMMARY_DIAGNOSTIC_CHARS: usize = 200;

/// Recovery tier, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Direct,
    ExplicitPlatform,
    MaterializeReload,
    RemoteTagEviction,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Direct,
        Tier::ExplicitPlatform,
        Tier::MaterializeReload,
        Tier::RemoteTagEviction,
    ];

    pub fn number(self) -> u8 {
        match self {
            Tier::Direct => 1,
            Tier::ExplicitPlatform => 2,
            Tier::MaterializeReload => 3,
            Tier::RemoteTagEviction => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Direct => "direct",
            Tier::ExplicitPlatform => "explicit-platform",
            Tier::MaterializeReload => "materialize-reload",
            Tier::RemoteTagEviction => "remote-tag-eviction",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier {} ({})", self.number(), self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// State observed right before a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDiagnostics {
    pub source_platform: Option<String>,
    pub destination_platform: Option<String>,
    pub source_digests: Vec<String>,
}

/// One try of one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub source: String,
    pub destination: String,
    pub tier: Tier,
    /// 1-based attempt number within the tier
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub class: Option<FailureClass>,
    pub diagnostics: Option<PushDiagnostics>,
    pub started_at: DateTime<Utc>,
}

impl TransferAttempt {
    pub(crate) fn record(
        source: &str,
        destination: &str,
        tier: Tier,
        attempt: u32,
        started_at: DateTime<Utc>,
        result: &Result<(), MirrorError>,
        diagnostics: Option<PushDiagnostics>,
    ) -> Self {
        let (outcome, error, class) = match result {
            Ok(()) => (AttemptOutcome::Succeeded, None, None),
            Err(e) => (AttemptOutcome::Failed, Some(e.to_string()), Some(e.class())),
        };
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            tier,
            attempt,
            outcome,
            error,
            class,
            diagnostics,
            started_at,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

/// Outcome of transferring one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub source: String,
    pub destination: String,
    pub succeeded: bool,
    pub attempts: Vec<TransferAttempt>,
    /// Furthest tier reached
    pub final_tier: Tier,
}

impl TransferResult {
    /// Error of the last failed attempt, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.error.as_deref())
    }

    /// Whether any attempt was made at `tier`.
    pub fn reached(&self, tier: Tier) -> bool {
        self.attempts.iter().any(|a| a.tier == tier)
    }

    /// One-line human summary with a truncated diagnostic.
    pub fn summary_line(&self) -> String {
        if self.succeeded {
            return format!(
                "OK   {} -> {} ({})",
                self.source, self.destination, self.final_tier
            );
        }
        let diagnostic = self.last_error().unwrap_or("no diagnostic");
        format!(
            "FAIL {} -> {} (gave up after {}): {}",
            self.source,
            self.destination,
            self.final_tier,
            truncate_chars(diagnostic, SUMMARY_DIAGNOSTIC_CHARS)
        )
    }
}

/// Truncate to at most `max` characters, marking the cut with "...".
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match single_line.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &single_line[..idx]),
        None => single_line,
    }
}
