//! Image reference parsing and normalization.
//!
//! Parses references like `public.ecr.aws/karpenter/controller:1.0.1` into
//! structured components, and canonicalizes reference strings discovered in
//! rendered charts before they are compared or transferred.

use chart_mirror_core::error::{MirrorError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Known misspelled registry hosts and their canonical spelling.
///
/// No canonical host may contain a misspelled one, which keeps
/// [`normalize`] idempotent.
const HOST_CORRECTIONS: &[(&str, &str)] = &[("ecr-public.aws.com", "public.ecr.aws")];

/// Rewrite known misspelled registry hosts to their canonical form.
///
/// Pure and idempotent: `normalize(&normalize(x)) == normalize(x)`.
/// Anything without a known misspelling is returned unchanged.
pub fn normalize(reference: &str) -> String {
    let mut out = reference.to_string();
    for (wrong, right) in HOST_CORRECTIONS {
        if out == *wrong {
            out = right.to_string();
            continue;
        }
        let host_prefix = format!("{}/", wrong);
        if out.contains(&host_prefix) {
            out = out.replace(&host_prefix, &format!("{}/", right));
        }
    }
    out
}

/// Drop an `@algorithm:hex` digest suffix, keeping name and tag.
pub fn strip_digest(reference: &str) -> &str {
    match reference.find('@') {
        Some(at) => &reference[..at],
        None => reference,
    }
}

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ImageReference {
    /// Registry hostname (e.g., "public.ecr.aws", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "karpenter/controller", "library/nginx")
    pub repository: String,
    /// Tag (e.g., "latest", "1.0.1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `bitnami/redis:7.2` → docker.io/bitnami/redis:7.2
    /// - `registry.k8s.io/ingress-nginx/controller:v1.9.4`
    /// - `ghcr.io/org/image@sha256:abc...` (no tag is implied)
    /// - `localhost:5000/image:tag`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MirrorError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(MirrorError::InvalidReference(format!(
                        "invalid digest in '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry_repository(name, reference)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository`, the identity used for "same image" checks.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// `registry/repository:tag`, the per-run dedup key.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.identity(), self.tag_or_latest())
    }

    /// Same image regardless of tag or digest.
    pub fn same_image(&self, other: &ImageReference) -> bool {
        self.registry == other.registry && self.repository == other.repository
    }

    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Last path segment of the repository (e.g. "controller").
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// A digest-pinned copy of this reference with the tag dropped.
    pub fn pinned(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// The ways a chart may spell this image's `registry/repository`.
    ///
    /// Docker Hub images are often written without the host, and official
    /// images without the `library/` namespace. Only aliases containing a `/`
    /// are returned so substring matching cannot hit unrelated names.
    pub fn identity_aliases(&self) -> Vec<String> {
        let mut aliases = vec![self.identity()];
        if self.registry == DEFAULT_REGISTRY {
            aliases.push(self.repository.clone());
            if let Some(short) = self.repository.strip_prefix("library/") {
                aliases.push(format!("{}/{}", DEFAULT_REGISTRY, short));
            }
        }
        aliases.retain(|a| a.contains('/'));
        aliases.dedup();
        aliases
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.identity();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `name[:tag]`. A colon only starts a tag after the last `/`, and a
/// purely numeric suffix on a slash-less name is a registry port.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let last_segment = &name_tag[last_segment_start..];
    match last_segment.rfind(':') {
        Some(colon) => {
            let tag = &last_segment[colon + 1..];
            if last_segment_start == 0 && tag.chars().all(|c| c.is_ascii_digit()) {
                (name_tag, None)
            } else {
                (&name_tag[..last_segment_start + colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str, reference: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        // The first component is a registry host if it looks like one
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(MirrorError::InvalidReference(format!(
                    "empty repository in '{}'",
                    reference
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_REGISTRY.to_string(), name.to_string()));
    }

    if name.is_empty() {
        return Err(MirrorError::InvalidReference(format!(
            "empty repository in '{}'",
            reference
        )));
    }
    Ok((DEFAULT_REGISTRY.to_string(), format!("library/{}", name)))
}
