//! Explicit logging context threaded through a mirror run.
//!
//! Each value is immutable; narrowing the context (`for_addon`, `component`,
//! `step`) returns a new value. Work done on behalf of a context runs inside
//! its [`tracing::Span`], so every event carries the run, addon, component
//! and step fields without any process-wide state.

use uuid::Uuid;

/// Who is doing what, for log attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorContext {
    run_id: Uuid,
    addon: Option<String>,
    component: &'static str,
    step: Option<String>,
}

impl MirrorContext {
    /// Start a new run with a fresh identifier.
    pub fn new_run() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            addon: None,
            component: "mirror",
            step: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn addon(&self) -> Option<&str> {
        self.addon.as_deref()
    }

    pub fn component_name(&self) -> &'static str {
        self.component
    }

    pub fn step_name(&self) -> Option<&str> {
        self.step.as_deref()
    }

    /// Scope to one chart (addon). Clears any step.
    pub fn for_addon(&self, addon: impl Into<String>) -> Self {
        Self {
            addon: Some(addon.into()),
            step: None,
            ..self.clone()
        }
    }

    pub fn component(&self, component: &'static str) -> Self {
        Self {
            component,
            ..self.clone()
        }
    }

    pub fn step(&self, step: impl Into<String>) -> Self {
        Self {
            step: Some(step.into()),
            ..self.clone()
        }
    }

    /// Span carrying this context's fields.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "mirror",
            run = %self.run_id,
            addon = self.addon.as_deref().unwrap_or("-"),
            component = self.component,
            step = self.step.as_deref().unwrap_or("-"),
        )
    }
}

impl std::fmt::Display for MirrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(addon) = &self.addon {
            write!(f, "[{}] ", addon)?;
        }
        write!(f, "{}", self.component)?;
        if let Some(step) = &self.step {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}
