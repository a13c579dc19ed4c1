//! `chart-mirror mirror` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chart_mirror_core::config::{EvictionPolicy, MirrorConfig, TransferMode};
use chart_mirror_core::context::MirrorContext;
use chart_mirror_core::platform::PlatformPolicy;
use chart_mirror_engine::oci::CredentialStore;
use chart_mirror_engine::overlay::{load_values, merge_values, write_overlay};
use chart_mirror_engine::{
    ChartMirror, DistributionRegistry, DockerCli, HelmCli, RegistryAuth, RegistryTool,
    ToolLoginGate,
};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct MirrorArgs {
    /// Chart directory (containing Chart.yaml)
    pub chart_dir: PathBuf,

    /// Where to write the values overlay [default: <CHART_DIR>/../values.yaml]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also write the chart's values.yaml with the overlay merged in
    #[arg(long)]
    pub apply: bool,

    /// Write the full run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Destination registry host[:port]
    #[arg(long)]
    pub registry: Option<String>,

    /// Repository prefix under the destination registry
    #[arg(long)]
    pub prefix: Option<String>,

    /// Platform policy: "auto" or os/arch (e.g. "linux/arm64")
    #[arg(long)]
    pub platform: Option<PlatformPolicy>,

    /// Attempts per recovery tier
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds between attempts
    #[arg(long)]
    pub retry_delay: Option<u64>,

    /// Tier 1 transfer mode: pull-push or copy
    #[arg(long)]
    pub mode: Option<TransferMode>,

    /// Remote tag eviction: never, digest-mismatch or always
    #[arg(long)]
    pub eviction: Option<EvictionPolicy>,

    /// Sandboxed DOCKER_CONFIG directory for the transfer tool
    #[arg(long)]
    pub docker_config: Option<PathBuf>,

    /// Talk to the destination registry API over plain HTTP
    #[arg(long)]
    pub insecure: bool,

    /// Extra chart values for rendering (KEY=VALUE, repeatable)
    #[arg(long = "set", value_parser = super::parse_key_value)]
    pub set: Vec<(String, String)>,

    /// List the images that would be mirrored and exit without transferring
    #[arg(long)]
    pub scan_only: bool,

    /// Render with optional subchart conditions switched off
    #[arg(long)]
    pub exclude_dependencies: bool,

    /// Do not check source manifests before transferring
    #[arg(long)]
    pub no_precheck: bool,
}

impl MirrorArgs {
    /// Config file values with command-line flags applied on top.
    fn resolve_config(&self) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
        let mut config = super::load_config(self.config.as_ref())?;
        if let Some(registry) = &self.registry {
            config.target_registry = registry.clone();
        }
        if let Some(prefix) = &self.prefix {
            config.repository_prefix = Some(prefix.clone());
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if let Some(retries) = self.retries {
            config.retry.budget = retries;
        }
        if let Some(delay) = self.retry_delay {
            config.retry.delay_secs = delay;
        }
        if let Some(mode) = self.mode {
            config.transfer_mode = mode;
        }
        if let Some(eviction) = self.eviction {
            config.eviction = eviction;
        }
        if let Some(dir) = &self.docker_config {
            config.docker_config_dir = Some(dir.clone());
        }
        Ok(config)
    }

    fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => default_output_path(&self.chart_dir),
        }
    }
}

/// `<CHART_DIR>/../values.yaml`
fn default_output_path(chart_dir: &Path) -> PathBuf {
    chart_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new(".."))
        .join("values.yaml")
}

pub async fn execute(args: MirrorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.resolve_config()?;
    config.validate()?;

    let mut docker = DockerCli::new(config.timeouts.command());
    if let Some(dir) = &config.docker_config_dir {
        docker = docker.with_config_dir(dir);
    }
    let tool: Arc<dyn RegistryTool> = Arc::new(docker);

    let store = match CredentialStore::default_path() {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(error = %e, "Credential store unavailable");
            None
        }
    };

    let target_auth = RegistryAuth::resolve(
        &config.target_registry,
        &config.credentials,
        store.as_ref(),
        RegistryAuth::from_env().as_ref(),
    );
    let mut registry = DistributionRegistry::new(
        config.target_registry.trim(),
        target_auth,
        config.timeouts.registry(),
    )?;
    if args.insecure {
        registry = registry.insecure();
    }

    let auth = ToolLoginGate::new(
        tool.clone(),
        &config.target_registry,
        config.credentials.clone(),
        store,
    );
    let renderer =
        HelmCli::new(config.timeouts.command()).with_dependencies(!args.exclude_dependencies);

    let mirror = ChartMirror::new(
        config,
        tool,
        Arc::new(registry),
        Arc::new(auth),
        Arc::new(renderer),
    )?
    .with_precheck(!args.no_precheck);

    let ctx = MirrorContext::new_run();
    if args.scan_only {
        let plan = mirror.scan_chart(&ctx, &args.chart_dir, &args.set).await?;
        if let Some(path) = &args.report {
            std::fs::write(path, serde_json::to_string_pretty(&plan)?)?;
            println!("Report: {}", path.display());
        }
        output::print_plan(&plan);
        return Ok(());
    }

    let report = mirror.mirror_chart(&ctx, &args.chart_dir, &args.set).await?;

    let output_path = args.output_path();
    write_overlay(&output_path, &report.overlay.document)?;
    println!("Overlay: {}", output_path.display());

    if args.apply {
        let values_path = args.chart_dir.join("values.yaml");
        let base = if values_path.exists() {
            load_values(&values_path)?
        } else {
            serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
        };
        let merged = merge_values(base, &report.overlay.document);
        write_overlay(&values_path, &merged)?;
        println!("Applied: {}", values_path.display());
    }

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Report: {}", path.display());
    }

    output::print_report(&report);

    if report.failed() > 0 {
        return Err(format!(
            "{} of {} images failed to mirror",
            report.failed(),
            report.results.len()
        )
        .into());
    }
    Ok(())
}
