//! CLI command definitions and dispatch.

mod mirror;
mod overlay;
mod resolve;
mod version;

use std::path::PathBuf;

use chart_mirror_core::config::{LogLevel, MirrorConfig};
use clap::{Parser, Subcommand, ValueEnum};

/// chart-mirror: copy a Helm chart's images into a private registry.
#[derive(Parser)]
#[command(name = "chart-mirror", version, about)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true, value_parser = ["debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Render a chart, mirror its images and write the values overlay
    Mirror(mirror::MirrorArgs),
    /// Generate a values overlay from explicit image mappings
    Overlay(overlay::OverlayArgs),
    /// Print the child manifest digest of an image for one platform
    Resolve(resolve::ResolveArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    /// Default log level: `--log-level`, then the config file, then `info`.
    pub fn default_log_level(&self) -> &'static str {
        if let Some(level) = self.log_level.as_deref() {
            return level_name(level);
        }
        let config_path = match &self.command {
            Command::Mirror(args) => args.config.as_ref(),
            _ => None,
        };
        let level = config_path
            .and_then(|path| MirrorConfig::from_file(path).ok())
            .map(|config| config.log_level)
            .unwrap_or_default();
        match level {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn level_name(level: &str) -> &'static str {
    match level {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Parse a `KEY=VALUE` argument.
pub(crate) fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

/// Load the config file if given, otherwise start from defaults.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<MirrorConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(MirrorConfig::from_file(path)?),
        None => Ok(MirrorConfig::default()),
    }
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Mirror(args) => mirror::execute(args).await,
        Command::Overlay(args) => overlay::execute(args).await,
        Command::Resolve(args) => resolve::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("settings.clusterName=prod").unwrap(),
            ("settings.clusterName".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_value("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_parse_mirror_command() {
        let cli = Cli::try_parse_from([
            "chart-mirror",
            "mirror",
            "charts/karpenter",
            "--registry",
            "registry.internal:5000",
            "--platform",
            "linux/arm64",
            "--eviction",
            "never",
            "--set",
            "replicas=1",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Mirror(args) => {
                assert_eq!(args.chart_dir, PathBuf::from("charts/karpenter"));
                assert_eq!(args.registry.as_deref(), Some("registry.internal:5000"));
                assert_eq!(args.set, vec![("replicas".to_string(), "1".to_string())]);
            }
            _ => panic!("expected mirror command"),
        }
    }

    #[test]
    fn test_rejects_bad_mode() {
        let result = Cli::try_parse_from(["chart-mirror", "mirror", "chart", "--mode", "rsync"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_log_level() {
        let cli = Cli::try_parse_from(["chart-mirror", "version"]).unwrap();
        assert_eq!(cli.default_log_level(), "info");

        let cli =
            Cli::try_parse_from(["chart-mirror", "--log-level", "debug", "version"]).unwrap();
        assert_eq!(cli.default_log_level(), "debug");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mirror.yaml");
        std::fs::write(&path, "target_registry: r.example.com\nlog_level: warn\n").unwrap();
        let cli = Cli::try_parse_from([
            "chart-mirror",
            "mirror",
            "chart",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(cli.default_log_level(), "warn");
    }
}
