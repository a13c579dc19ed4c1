//! Chart pipeline: discover, transfer, overlay.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chart_mirror_core::config::MirrorConfig;
use chart_mirror_core::context::MirrorContext;
use chart_mirror_core::error::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::Instrument;

use crate::chart::{ChartMetadata, ChartRenderer};
use crate::discovery::extract_image_references;
use crate::oci::credentials::AuthGate;
use crate::oci::reference::{normalize, ImageReference};
use crate::oci::registry::RegistryManager;
use crate::oci::tool::RegistryTool;
use crate::overlay::{generate_overlay, load_values, Overlay};
use crate::transfer::{TransferExecutor, TransferResult, TransferSettings};

/// An image that never reached the transfer stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedImage {
    pub reference: String,
    pub reason: String,
}

/// One image a run intends to transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedImage {
    pub source: String,
    pub destination: String,
}

/// What a run would transfer, computed without moving any bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorPlan {
    pub chart: String,
    pub images: Vec<PlannedImage>,
    pub skipped: Vec<SkippedImage>,
}

/// Everything one chart run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorReport {
    pub chart: String,
    pub run_id: String,
    pub results: Vec<TransferResult>,
    pub skipped: Vec<SkippedImage>,
    pub overlay: Overlay,
}

impl MirrorReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Mirrors the images of one chart at a time.
pub struct ChartMirror {
    config: MirrorConfig,
    tool: Arc<dyn RegistryTool>,
    auth: Arc<dyn AuthGate>,
    renderer: Arc<dyn ChartRenderer>,
    registry: Arc<dyn RegistryManager>,
    executor: TransferExecutor,
    precheck: bool,
}

impl ChartMirror {
    /// Validates the configuration; an invalid one is fatal.
    pub fn new(
        config: MirrorConfig,
        tool: Arc<dyn RegistryTool>,
        registry: Arc<dyn RegistryManager>,
        auth: Arc<dyn AuthGate>,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Result<Self> {
        config.validate()?;
        let executor = TransferExecutor::new(
            tool.clone(),
            registry.clone(),
            auth.clone(),
            TransferSettings::from_config(&config),
        );
        Ok(Self {
            config,
            tool,
            auth,
            renderer,
            registry,
            executor,
            precheck: true,
        })
    }

    /// Enable or disable the source manifest check run before transfer.
    pub fn with_precheck(mut self, enabled: bool) -> Self {
        self.precheck = enabled;
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Mirror location of `source` for `chart`:
    /// `<target>/<prefix>/<chart>/<name>:<tag>`.
    pub fn destination_for(&self, chart: &str, source: &ImageReference) -> ImageReference {
        let repository = match self.config.prefix() {
            Some(prefix) => format!("{}/{}/{}", prefix, chart, source.name()),
            None => format!("{}/{}", chart, source.name()),
        };
        ImageReference {
            registry: self.config.target_registry.trim().to_string(),
            repository,
            tag: Some(source.tag_or_latest().to_string()),
            digest: None,
        }
    }

    /// Render `chart_dir`, mirror every image it deploys, and build the
    /// overlay against the chart's `values.yaml`.
    pub async fn mirror_chart(
        &self,
        ctx: &MirrorContext,
        chart_dir: &Path,
        overrides: &[(String, String)],
    ) -> Result<MirrorReport> {
        let (ctx, metadata, images) = self.discover(ctx, chart_dir, overrides).await?;

        let values_path = chart_dir.join("values.yaml");
        let values = if values_path.exists() {
            load_values(&values_path)?
        } else {
            tracing::warn!(parent: &ctx.span(), path = %values_path.display(), "Chart has no values.yaml");
            Value::Mapping(Mapping::new())
        };

        Ok(self.mirror_images(&ctx, &metadata.name, &images, &values).await)
    }

    /// Render `chart_dir` and report what a run would transfer.
    pub async fn scan_chart(
        &self,
        ctx: &MirrorContext,
        chart_dir: &Path,
        overrides: &[(String, String)],
    ) -> Result<MirrorPlan> {
        let (ctx, metadata, images) = self.discover(ctx, chart_dir, overrides).await?;
        Ok(self.plan_images(&ctx, &metadata.name, &images).await)
    }

    /// Plan an explicit image list for `chart` without transferring it.
    pub async fn plan_images(
        &self,
        ctx: &MirrorContext,
        chart: &str,
        images: &[String],
    ) -> MirrorPlan {
        let (plan, skipped) = self.plan(ctx, chart, images).await;
        MirrorPlan {
            chart: chart.to_string(),
            images: plan
                .iter()
                .map(|(source, destination)| PlannedImage {
                    source: source.to_string(),
                    destination: destination.to_string(),
                })
                .collect(),
            skipped,
        }
    }

    async fn discover(
        &self,
        ctx: &MirrorContext,
        chart_dir: &Path,
        overrides: &[(String, String)],
    ) -> Result<(MirrorContext, ChartMetadata, Vec<String>)> {
        let metadata = ChartMetadata::load(chart_dir)?;
        let ctx = ctx.for_addon(metadata.name.clone());

        let rendered = self
            .renderer
            .render(chart_dir, overrides)
            .instrument(ctx.component("render").span())
            .await?;
        let images = extract_image_references(&rendered);
        tracing::info!(parent: &ctx.span(), count = images.len(), "Discovered images");
        Ok((ctx, metadata, images))
    }

    /// Mirror an explicit image list for `chart` and build the overlay
    /// against `values`. Never fails: per-image problems land in the report.
    pub async fn mirror_images(
        &self,
        ctx: &MirrorContext,
        chart: &str,
        images: &[String],
        values: &Value,
    ) -> MirrorReport {
        let ctx = if ctx.addon().is_some() {
            ctx.clone()
        } else {
            ctx.for_addon(chart)
        };
        let plan_ctx = ctx.component("plan");
        let (plan, skipped) = self.plan(&ctx, chart, images).await;

        for (_, destination) in &plan {
            if let Err(e) = self.registry.create_repository(&destination.repository).await {
                tracing::warn!(
                    parent: &plan_ctx.span(),
                    repository = %destination.repository,
                    error = %e,
                    "Could not ensure destination repository"
                );
            }
        }

        let mut results = Vec::with_capacity(plan.len());
        for (source, destination) in &plan {
            let result = self.executor.transfer(&ctx, source, destination).await;
            tracing::info!(parent: &ctx.span(), "{}", result.summary_line());
            results.push(result);
        }

        // Only images that made it to the mirror may be redirected
        let (sources, destinations): (Vec<_>, Vec<_>) = plan
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.succeeded)
            .map(|((source, destination), _)| (source.clone(), destination.clone()))
            .unzip();

        let overlay = {
            let _guard = ctx.component("overlay").span().entered();
            generate_overlay(values, &sources, &destinations)
        };
        for warning in &overlay.warnings {
            tracing::warn!(parent: &ctx.span(), "{}", warning);
        }

        MirrorReport {
            chart: chart.to_string(),
            run_id: ctx.run_id().to_string(),
            results,
            skipped,
            overlay,
        }
    }

    /// Parse, dedupe, assign destinations, then drop sources whose
    /// manifest cannot be read.
    async fn plan(
        &self,
        ctx: &MirrorContext,
        chart: &str,
        images: &[String],
    ) -> (Vec<(ImageReference, ImageReference)>, Vec<SkippedImage>) {
        let ctx = if ctx.addon().is_some() {
            ctx.clone()
        } else {
            ctx.for_addon(chart)
        };
        let plan_ctx = ctx.component("plan");
        let (candidates, mut skipped) = self.assign_destinations(chart, images);

        let mut plan = Vec::with_capacity(candidates.len());
        for (source, destination) in candidates {
            match self.check_source(&plan_ctx, &source).await {
                Ok(()) => plan.push((source, destination)),
                Err(reason) => skipped.push(SkippedImage {
                    reference: source.to_string(),
                    reason,
                }),
            }
        }

        for skip in &skipped {
            tracing::warn!(parent: &plan_ctx.span(), reference = %skip.reference, reason = %skip.reason, "Skipping image");
        }
        (plan, skipped)
    }

    fn assign_destinations(
        &self,
        chart: &str,
        images: &[String],
    ) -> (Vec<(ImageReference, ImageReference)>, Vec<SkippedImage>) {
        let mut seen = HashSet::new();
        // destination key -> source that claimed it
        let mut claimed: HashMap<String, String> = HashMap::new();
        let mut plan = Vec::new();
        let mut skipped = Vec::new();

        for raw in images {
            let source = match ImageReference::parse(&normalize(raw)) {
                Ok(source) => source,
                Err(e) => {
                    skipped.push(SkippedImage {
                        reference: raw.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !seen.insert(source.dedup_key()) {
                continue;
            }
            let destination = self.destination_for(chart, &source);
            if let Some(owner) = claimed.get(&destination.dedup_key()) {
                skipped.push(SkippedImage {
                    reference: source.to_string(),
                    reason: format!("destination {} already used by {}", destination, owner),
                });
                continue;
            }
            claimed.insert(destination.dedup_key(), source.to_string());
            plan.push((source, destination));
        }
        (plan, skipped)
    }

    /// Confirm the source manifest is readable.
    async fn check_source(
        &self,
        ctx: &MirrorContext,
        source: &ImageReference,
    ) -> std::result::Result<(), String> {
        if !self.precheck {
            return Ok(());
        }
        if let Err(e) = self.auth.ensure_login(&source.registry).await {
            // The executor retries authentication per attempt
            tracing::warn!(parent: &ctx.span(), registry = %source.registry, error = %e, "Login before manifest check failed");
            return Ok(());
        }
        self.tool
            .manifest_inspect(&source.to_string())
            .await
            .map(|_| ())
            .map_err(|e| format!("source manifest unreachable: {}", e))
    }
}
