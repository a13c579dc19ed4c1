//! Transfer Executor
//!
//! Moves one image to its destination through an ordered list of recovery
//! tiers. Each tier is retried up to the retry budget with a fixed delay;
//! a tier runs only after every lower tier failed. Exhausting all tiers
//! yields a failed [`TransferResult`], never an error.

pub mod result;
pub mod tier;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chart_mirror_core::config::{EvictionPolicy, MirrorConfig, TransferMode};
use chart_mirror_core::context::MirrorContext;
use chart_mirror_core::error::{MirrorError, Result};
use chart_mirror_core::platform::PlatformPolicy;
use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use crate::oci::credentials::AuthGate;
use crate::oci::reference::ImageReference;
use crate::oci::registry::RegistryManager;
use crate::oci::tool::RegistryTool;

pub use result::{AttemptOutcome, PushDiagnostics, Tier, TransferAttempt, TransferResult};
pub use tier::{default_handlers, TierEnv, TierHandler, TransferScratch};

/// Knobs the executor needs from the run configuration.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub platform: PlatformPolicy,
    pub retry_budget: u32,
    pub retry_delay: Duration,
    pub mode: TransferMode,
    pub eviction: EvictionPolicy,
    pub work_dir: PathBuf,
}

impl TransferSettings {
    pub fn from_config(config: &MirrorConfig) -> Self {
        Self {
            platform: config.platform.clone(),
            retry_budget: config.retry.budget.max(1),
            retry_delay: config.retry.delay(),
            mode: config.transfer_mode,
            eviction: config.eviction,
            work_dir: config.work_dir.clone(),
        }
    }
}

/// One source/destination pair.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source: ImageReference,
    pub destination: ImageReference,
}

impl TransferJob {
    pub fn new(source: ImageReference, destination: ImageReference) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn source_ref(&self) -> String {
        self.source.full_reference()
    }

    pub fn destination_ref(&self) -> String {
        self.destination.full_reference()
    }
}

/// Drives the recovery tiers for one image at a time.
pub struct TransferExecutor {
    tool: Arc<dyn RegistryTool>,
    registry: Arc<dyn RegistryManager>,
    auth: Arc<dyn AuthGate>,
    settings: TransferSettings,
    handlers: Vec<Box<dyn TierHandler>>,
}

impl TransferExecutor {
    pub fn new(
        tool: Arc<dyn RegistryTool>,
        registry: Arc<dyn RegistryManager>,
        auth: Arc<dyn AuthGate>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            tool,
            registry,
            auth,
            settings,
            handlers: default_handlers(),
        }
    }

    /// Replace the tier list.
    pub fn with_handlers(mut self, handlers: Vec<Box<dyn TierHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Transfer `source` to `destination`, escalating through the tiers.
    pub async fn transfer(
        &self,
        ctx: &MirrorContext,
        source: &ImageReference,
        destination: &ImageReference,
    ) -> TransferResult {
        let ctx = ctx.component("transfer");
        let job = TransferJob::new(source.clone(), destination.clone());
        let source_ref = job.source_ref();
        let destination_ref = job.destination_ref();

        let mut scratch = TransferScratch::default();
        let mut attempts = Vec::new();
        let mut final_tier = Tier::Direct;

        tracing::info!(
            parent: &ctx.span(),
            source = %source_ref,
            destination = %destination_ref,
            "Transferring image"
        );

        'tiers: for handler in &self.handlers {
            let tier = handler.tier();
            final_tier = tier;
            let budget = handler.attempts(self.settings.retry_budget);
            let step = ctx.step(format!("tier-{}", tier.number()));

            for attempt in 1..=budget {
                if attempt > 1 && !self.settings.retry_delay.is_zero() {
                    tokio::time::sleep(self.settings.retry_delay).await;
                }

                let started_at = Utc::now();
                let outcome = self
                    .attempt(handler.as_ref(), &job, &mut scratch)
                    .instrument(step.span())
                    .await;
                let record = TransferAttempt::record(
                    &source_ref,
                    &destination_ref,
                    tier,
                    attempt,
                    started_at,
                    &outcome,
                    scratch.diagnostics.take(),
                );
                attempts.push(record);

                match outcome {
                    Ok(()) => {
                        tracing::info!(
                            parent: &step.span(),
                            source = %source_ref,
                            destination = %destination_ref,
                            tier = %tier,
                            attempt,
                            "Image transferred"
                        );
                        return TransferResult {
                            source: source_ref,
                            destination: destination_ref,
                            succeeded: true,
                            attempts,
                            final_tier,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(
                            parent: &step.span(),
                            source = %source_ref,
                            tier = %tier,
                            attempt,
                            budget,
                            class = %e.class(),
                            error = %e,
                            "Transfer attempt failed"
                        );
                        // Retrying the same push cannot add a platform
                        if tier == Tier::Direct && e.is_missing_platform() {
                            continue 'tiers;
                        }
                    }
                }
            }
        }

        tracing::error!(
            parent: &ctx.span(),
            source = %source_ref,
            destination = %destination_ref,
            final_tier = %final_tier,
            "All recovery tiers exhausted"
        );
        TransferResult {
            source: source_ref,
            destination: destination_ref,
            succeeded: false,
            attempts,
            final_tier,
        }
    }

    /// One attempt: authenticate both ends, then run the handler with
    /// panics converted into tier failures.
    async fn attempt(
        &self,
        handler: &dyn TierHandler,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        self.auth.ensure_login(&job.source.registry).await?;
        self.auth.ensure_login(&job.destination.registry).await?;

        let env = TierEnv {
            tool: self.tool.as_ref(),
            registry: self.registry.as_ref(),
            settings: &self.settings,
        };

        match std::panic::AssertUnwindSafe(handler.run(&env, job, scratch))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tier = %handler.tier(), panic = %message, "Tier handler panicked");
                Err(MirrorError::TransferFailure {
                    tier: handler.tier().number(),
                    message: format!("tier handler panicked: {}", message),
                })
            }
        }
    }
}
