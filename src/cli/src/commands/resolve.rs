//! `chart-mirror resolve` command.

use std::path::PathBuf;
use std::time::Duration;

use chart_mirror_core::platform::PlatformSpec;
use chart_mirror_engine::oci::{resolve_platform_digest, select_platform_digest};
use chart_mirror_engine::{normalize, DockerCli, ImageReference};
use clap::Args;

#[derive(Args)]
pub struct ResolveArgs {
    /// Image reference (e.g., "quay.io/jetstack/cert-manager-controller:v1.14.4")
    pub image: String,

    /// Target platform
    #[arg(long, default_value = "linux/amd64")]
    pub platform: PlatformSpec,

    /// Read the manifest document from a file instead of the registry
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Sandboxed DOCKER_CONFIG directory for the transfer tool
    #[arg(long)]
    pub docker_config: Option<PathBuf>,

    /// Timeout in seconds for the manifest lookup
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,
}

pub async fn execute(args: ResolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&normalize(&args.image))?;
    let full = reference.full_reference();

    let digest = match &args.manifest {
        Some(path) => {
            let document = std::fs::read_to_string(path)?;
            select_platform_digest(&document, &args.platform)?
        }
        None => {
            let mut docker = DockerCli::new(Duration::from_secs(args.timeout));
            if let Some(dir) = &args.docker_config {
                docker = docker.with_config_dir(dir);
            }
            resolve_platform_digest(&docker, &full, &args.platform).await?
        }
    };

    println!("{}", describe(&full, &args.platform, digest.as_deref()));
    Ok(())
}

fn describe(reference: &str, platform: &PlatformSpec, digest: Option<&str>) -> String {
    match digest {
        Some(digest) => format!("{}@{}", reference_name(reference), digest),
        None => format!(
            "{} is single-architecture or has no {} entry",
            reference, platform
        ),
    }
}

/// Reference with its tag and digest removed.
fn reference_name(reference: &str) -> &str {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    let slash = without_digest.rfind('/').map_or(0, |p| p + 1);
    match without_digest[slash..].rfind(':') {
        Some(colon) => &without_digest[..slash + colon],
        None => without_digest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INDEX: &str = r#"{
      "schemaVersion": 2,
      "mediaType": "application/vnd.oci.image.index.v1+json",
      "manifests": [
        {"digest": "sha256:aaa", "platform": {"os": "linux", "architecture": "amd64"}},
        {"digest": "sha256:bbb", "platform": {"os": "linux", "architecture": "arm64"}}
      ]
    }"#;

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(
                "quay.io/org/app:1.0",
                &PlatformSpec::linux_arm64(),
                Some("sha256:bbb")
            ),
            "quay.io/org/app@sha256:bbb"
        );
        assert_eq!(
            describe("localhost:5000/app:1.0", &PlatformSpec::linux_amd64(), None),
            "localhost:5000/app:1.0 is single-architecture or has no linux/amd64 entry"
        );
    }

    #[test]
    fn test_reference_name() {
        assert_eq!(reference_name("localhost:5000/app:1.0"), "localhost:5000/app");
        assert_eq!(reference_name("localhost:5000/app"), "localhost:5000/app");
        assert_eq!(reference_name("quay.io/org/app@sha256:abc"), "quay.io/org/app");
    }

    #[tokio::test]
    async fn test_resolve_from_manifest_file() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("index.json");
        std::fs::write(&manifest, INDEX).unwrap();

        let args = ResolveArgs {
            image: "quay.io/org/app:1.0".to_string(),
            platform: PlatformSpec::linux_arm64(),
            manifest: Some(manifest),
            docker_config: None,
            timeout: 1,
        };
        assert!(execute(args).await.is_ok());
    }
}
