//! Platform resolution for possibly multi-architecture images.
//!
//! Decides which platforms to try when pulling and, for images published
//! as a manifest list / image index, finds the child manifest digest for a
//! requested `{os, architecture}`.

use chart_mirror_core::error::{MirrorError, Result};
use chart_mirror_core::platform::{PlatformPolicy, PlatformSpec};
use serde::Deserialize;

use super::tool::RegistryTool;

/// Media types that describe a multi-architecture index.
const INDEX_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
];

/// One child of a manifest list / image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestIndexEntry {
    pub platform: PlatformSpec,
    pub digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<Vec<IndexChild>>,
}

#[derive(Debug, Deserialize)]
struct IndexChild {
    digest: String,
    #[serde(default)]
    platform: Option<ChildPlatform>,
}

#[derive(Debug, Deserialize)]
struct ChildPlatform {
    os: String,
    architecture: String,
}

/// Platforms to try, in order. `None` means "no platform constraint".
pub fn choose_platform_sequence(policy: &PlatformPolicy) -> Vec<Option<PlatformSpec>> {
    match policy {
        PlatformPolicy::Auto => vec![
            None,
            Some(PlatformSpec::linux_amd64()),
            Some(PlatformSpec::linux_arm64()),
        ],
        PlatformPolicy::Explicit(platform) => vec![Some(platform.clone())],
    }
}

/// Parse the children of a manifest document.
///
/// Returns `None` for a single-architecture manifest. Children without
/// platform metadata (attestation manifests, for instance) are skipped.
pub fn parse_index_entries(document: &str) -> Result<Option<Vec<ManifestIndexEntry>>> {
    let doc: ManifestDocument = serde_json::from_str(document)?;

    let is_index = match (&doc.media_type, &doc.manifests) {
        (Some(media_type), _) => INDEX_MEDIA_TYPES.contains(&media_type.as_str()),
        // OCI indexes may omit mediaType; the manifests array gives them away
        (None, Some(_)) => true,
        (None, None) => false,
    };
    if !is_index {
        return Ok(None);
    }

    let entries = doc
        .manifests
        .unwrap_or_default()
        .into_iter()
        .filter_map(|child| {
            child.platform.map(|p| ManifestIndexEntry {
                platform: PlatformSpec::new(p.os, p.architecture),
                digest: child.digest,
            })
        })
        .collect();
    Ok(Some(entries))
}

/// Digest of the index child matching `platform` exactly, if any.
pub fn select_platform_digest(document: &str, platform: &PlatformSpec) -> Result<Option<String>> {
    let entries = match parse_index_entries(document)? {
        Some(entries) => entries,
        None => return Ok(None),
    };
    Ok(entries
        .into_iter()
        .find(|entry| entry.platform.matches(&platform.os, &platform.architecture))
        .map(|entry| entry.digest))
}

/// Resolve the child manifest digest of `reference` for `platform`.
///
/// Returns `None` when the image is single-architecture (nothing to
/// disambiguate) or when no child matches. Read-only; safe to repeat.
pub async fn resolve_platform_digest(
    tool: &dyn RegistryTool,
    reference: &str,
    platform: &PlatformSpec,
) -> Result<Option<String>> {
    let document = tool.manifest_inspect(reference).await?;
    let digest = select_platform_digest(&document, platform).map_err(|e| {
        MirrorError::ResolutionFailure {
            reference: reference.to_string(),
            message: format!("unreadable manifest document: {}", e),
        }
    })?;

    match &digest {
        Some(d) => tracing::debug!(reference, platform = %platform, digest = %d, "Resolved platform digest"),
        None => tracing::debug!(reference, platform = %platform, "No platform digest to resolve"),
    }
    Ok(digest)
}

/// Pull `reference` walking the policy's platform sequence.
///
/// Stops at the first pull whose local artifact reports a concrete
/// platform and returns that platform.
pub async fn pull_with_policy(
    tool: &dyn RegistryTool,
    reference: &str,
    policy: &PlatformPolicy,
) -> Result<PlatformSpec> {
    let mut last_error: Option<MirrorError> = None;

    for platform in choose_platform_sequence(policy) {
        let label = platform
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "none".to_string());

        if let Err(e) = tool.pull(reference, platform.as_ref()).await {
            tracing::warn!(reference, platform = %label, error = %e, "Pull failed");
            last_error = Some(e);
            continue;
        }

        match tool.inspect_platform(reference).await {
            Ok(Some(effective)) => {
                tracing::info!(reference, platform = %effective, "Pulled image");
                return Ok(effective);
            }
            Ok(None) => {
                tracing::warn!(
                    reference,
                    platform = %label,
                    "Pulled image lacks platform metadata; trying next platform"
                );
            }
            Err(e) => {
                tracing::warn!(reference, platform = %label, error = %e, "Platform inspect failed");
                last_error = Some(e);
            }
        }
    }

    Err(MirrorError::ResolutionFailure {
        reference: reference.to_string(),
        message: match last_error {
            Some(e) => format!("no platform in policy '{}' resolved: {}", policy, e),
            None => format!("no platform in policy '{}' resolved", policy),
        },
    })
}
