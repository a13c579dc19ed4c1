//! Chart rendering through the `helm` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chart_mirror_core::error::{MirrorError, Result};
use serde::Deserialize;
use tokio::process::Command;

/// Renders a chart into manifest text.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, chart_dir: &Path, overrides: &[(String, String)]) -> Result<String>;
}

/// Subset of `Chart.yaml` the mirror reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartDependency {
    pub name: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl ChartMetadata {
    /// Read `<chart_dir>/Chart.yaml`.
    pub fn load(chart_dir: &Path) -> Result<Self> {
        let path = chart_dir.join("Chart.yaml");
        let data = std::fs::read_to_string(&path).map_err(|e| {
            MirrorError::Other(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let metadata: Self = serde_yaml::from_str(&data)?;
        if metadata.name.trim().is_empty() {
            return Err(MirrorError::Other(format!(
                "{} has no chart name",
                path.display()
            )));
        }
        Ok(metadata)
    }

    /// Conditions gating optional dependencies, e.g. `redis.enabled`.
    pub fn dependency_conditions(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter_map(|d| d.condition.as_deref())
            .flat_map(|c| c.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Minimal values some charts require before they will template at all.
pub fn default_overrides(chart_name: &str) -> Vec<(String, String)> {
    let pairs: &[(&str, &str)] = match chart_name {
        "aws-load-balancer-controller" => &[("clusterName", "placeholder")],
        "karpenter" => &[
            ("settings.clusterName", "placeholder"),
            ("settings.clusterEndpoint", "https://placeholder"),
        ],
        _ => &[],
    };
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// [`ChartRenderer`] backed by `helm template`.
pub struct HelmCli {
    binary: PathBuf,
    timeout: Duration,
    include_dependencies: bool,
}

impl HelmCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("helm"),
            timeout,
            include_dependencies: true,
        }
    }

    /// Render optional subcharts (the default) or switch their conditions off.
    pub fn with_dependencies(mut self, include: bool) -> Self {
        self.include_dependencies = include;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Arguments for `helm template`.
    fn template_args(
        &self,
        chart_dir: &Path,
        metadata: &ChartMetadata,
        overrides: &[(String, String)],
    ) -> Vec<String> {
        let mut args = vec![
            "template".to_string(),
            "--dependency-update".to_string(),
            chart_dir.to_string_lossy().into_owned(),
        ];
        // Subcharts still have to be fetched; the condition decides whether they render
        for condition in metadata.dependency_conditions() {
            args.push("--set".to_string());
            args.push(format!("{}={}", condition, self.include_dependencies));
        }
        for (key, value) in default_overrides(&metadata.name)
            .iter()
            .chain(overrides.iter())
        {
            args.push("--set-string".to_string());
            args.push(format!("{}={}", key, value));
        }
        args
    }
}

#[async_trait]
impl ChartRenderer for HelmCli {
    async fn render(&self, chart_dir: &Path, overrides: &[(String, String)]) -> Result<String> {
        let metadata = ChartMetadata::load(chart_dir)?;
        let args = self.template_args(chart_dir, &metadata, overrides);
        tracing::info!(
            chart = %metadata.name,
            dir = %chart_dir.display(),
            dependencies = self.include_dependencies,
            "Rendering chart"
        );
        tracing::debug!(args = ?args, "Running helm");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MirrorError::ToolError {
                operation: "helm-template".to_string(),
                message: format!("failed to spawn {}: {}", self.binary.display(), e),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MirrorError::TimeoutFailure {
                    operation: "helm-template".to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(MirrorError::ToolError {
                operation: "helm-template".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let rendered = String::from_utf8_lossy(&output.stdout).into_owned();
        if rendered.trim().is_empty() {
            return Err(MirrorError::ToolError {
                operation: "helm-template".to_string(),
                message: format!("{} rendered no output", metadata.name),
            });
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_chart(dir: &Path, chart_yaml: &str) {
        std::fs::write(dir.join("Chart.yaml"), chart_yaml).unwrap();
    }

    #[test]
    fn test_default_overrides() {
        assert_eq!(
            default_overrides("aws-load-balancer-controller"),
            vec![("clusterName".to_string(), "placeholder".to_string())]
        );
        assert_eq!(default_overrides("karpenter").len(), 2);
        assert!(default_overrides("cert-manager").is_empty());
    }

    #[test]
    fn test_metadata_and_conditions() {
        let dir = TempDir::new().unwrap();
        write_chart(
            dir.path(),
            r#"
apiVersion: v2
name: demo
version: 1.2.3
dependencies:
  - name: redis
    repository: oci://registry-1.docker.io/bitnamicharts
    condition: redis.enabled
  - name: common
    repository: https://charts.example.com
"#,
        );
        let metadata = ChartMetadata::load(dir.path()).unwrap();
        assert_eq!(metadata.name, "demo");
        assert_eq!(metadata.version.as_deref(), Some("1.2.3"));
        assert_eq!(metadata.dependency_conditions(), vec!["redis.enabled".to_string()]);
    }

    fn gated_metadata() -> ChartMetadata {
        ChartMetadata {
            name: "demo".to_string(),
            version: None,
            dependencies: vec![ChartDependency {
                name: "redis".to_string(),
                repository: None,
                condition: Some("redis.enabled".to_string()),
            }],
        }
    }

    #[test]
    fn test_template_args_excluding_dependencies() {
        let helm = HelmCli::new(Duration::from_secs(5)).with_dependencies(false);
        let args = helm.template_args(Path::new("/charts/demo"), &gated_metadata(), &[]);
        assert_eq!(
            args,
            vec![
                "template",
                "--dependency-update",
                "/charts/demo",
                "--set",
                "redis.enabled=false",
            ]
        );
    }

    #[test]
    fn test_template_args() {
        let metadata = ChartMetadata {
            name: "karpenter".to_string(),
            version: None,
            dependencies: vec![ChartDependency {
                name: "x".to_string(),
                repository: None,
                condition: Some("x.enabled".to_string()),
            }],
        };
        let args = HelmCli::new(Duration::from_secs(5)).template_args(
            Path::new("/charts/karpenter"),
            &metadata,
            &[("replicas".to_string(), "1".to_string())],
        );
        assert_eq!(
            args,
            vec![
                "template",
                "--dependency-update",
                "/charts/karpenter",
                "--set",
                "x.enabled=true",
                "--set-string",
                "settings.clusterName=placeholder",
                "--set-string",
                "settings.clusterEndpoint=https://placeholder",
                "--set-string",
                "replicas=1",
            ]
        );
    }

    #[test]
    fn test_missing_chart_yaml() {
        let dir = TempDir::new().unwrap();
        assert!(ChartMetadata::load(dir.path()).is_err());
    }
}
