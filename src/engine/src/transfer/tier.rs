//! Recovery tier handlers.
//!
//! Each handler performs one attempt of its tier. The executor owns retry
//! counting, delays, logging and error capture; a handler only moves bytes
//! and returns `Ok` once the destination push succeeded.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chart_mirror_core::config::{EvictionPolicy, TransferMode};
use chart_mirror_core::error::{MirrorError, Result};
use chart_mirror_core::platform::PlatformPolicy;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::result::{PushDiagnostics, Tier};
use super::{TransferJob, TransferSettings};
use crate::oci::platform::{
    parse_index_entries, pull_with_policy, resolve_platform_digest, ManifestIndexEntry,
};
use crate::oci::registry::RegistryManager;
use crate::oci::tool::RegistryTool;

/// Collaborators available to a tier attempt.
pub struct TierEnv<'a> {
    pub tool: &'a dyn RegistryTool,
    pub registry: &'a dyn RegistryManager,
    pub settings: &'a TransferSettings,
}

/// State carried across the tiers of one image.
#[derive(Debug, Default)]
pub struct TransferScratch {
    /// Diagnostics captured before the most recent push
    pub diagnostics: Option<PushDiagnostics>,
    /// Every source digest observed so far (platform children and repo digests)
    pub source_digests: BTreeSet<String>,
}

impl TransferScratch {
    fn remember_digests<I: IntoIterator<Item = String>>(&mut self, digests: I) {
        self.source_digests.extend(digests);
    }

    /// Whether `digest` is one of the source's known digests.
    pub fn knows_digest(&self, digest: &str) -> bool {
        self.source_digests
            .iter()
            .any(|known| known == digest || known.ends_with(&format!("@{}", digest)))
    }
}

/// One recovery tier.
#[async_trait]
pub trait TierHandler: Send + Sync {
    fn tier(&self) -> Tier;

    /// Attempts allowed for this tier given the retry budget.
    fn attempts(&self, budget: u32) -> u32 {
        budget
    }

    async fn run(
        &self,
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()>;
}

/// The four tiers in order.
pub fn default_handlers() -> Vec<Box<dyn TierHandler>> {
    vec![
        Box::new(DirectTransfer),
        Box::new(ExplicitPlatformRetry),
        Box::new(MaterializeReload),
        Box::new(RemoteTagEviction),
    ]
}

/// Tier 1: copy, or pull + tag + push.
pub struct DirectTransfer;

#[async_trait]
impl TierHandler for DirectTransfer {
    fn tier(&self) -> Tier {
        Tier::Direct
    }

    async fn run(
        &self,
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        let source = job.source_ref();
        let destination = job.destination_ref();
        let index = inspect_source_index(env.tool, &source, scratch).await;

        if env.settings.mode == TransferMode::Copy {
            let platform = match &env.settings.platform {
                PlatformPolicy::Explicit(p) => Some(p),
                PlatformPolicy::Auto => None,
            };
            let source_digests: Vec<String> = index.iter().map(|e| e.digest.clone()).collect();
            tracing::debug!(
                source = %source,
                destination = %destination,
                platform = ?platform.map(ToString::to_string),
                source_digests = ?source_digests,
                "Pre-copy diagnostics"
            );
            scratch.diagnostics = Some(PushDiagnostics {
                source_platform: platform.map(ToString::to_string),
                destination_platform: None,
                source_digests,
            });
            return env.tool.copy(&source, &destination, platform).await;
        }

        pull_with_policy(env.tool, &source, &env.settings.platform).await?;
        env.tool.tag(&source, &destination).await?;
        capture_diagnostics(env.tool, &source, &destination, scratch).await;
        env.tool.push(&destination).await
    }
}

/// Tier 2: re-fetch pinned to an explicit platform, then tag + push.
pub struct ExplicitPlatformRetry;

impl ExplicitPlatformRetry {
    pub(crate) async fn transfer(
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        let destination = job.destination_ref();
        let identity = fetch_pinned(env, job, scratch).await?;
        env.tool.tag(&identity, &destination).await?;
        capture_diagnostics(env.tool, &identity, &destination, scratch).await;
        env.tool.push(&destination).await
    }
}

#[async_trait]
impl TierHandler for ExplicitPlatformRetry {
    fn tier(&self) -> Tier {
        Tier::ExplicitPlatform
    }

    async fn run(
        &self,
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        Self::transfer(env, job, scratch).await
    }
}

/// Tier 3: export to an archive, reload, retag from the reloaded identity.
pub struct MaterializeReload;

#[async_trait]
impl TierHandler for MaterializeReload {
    fn tier(&self) -> Tier {
        Tier::MaterializeReload
    }

    async fn run(
        &self,
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        let destination = job.destination_ref();
        let identity = fetch_pinned(env, job, scratch).await?;

        let archive = ScopedArchive::create(&env.settings.work_dir)?;
        env.tool.save(&identity, archive.path()).await?;
        let (sha256, size) = archive.checksum()?;
        tracing::info!(
            identity = %identity,
            archive = %archive.path().display(),
            sha256 = %sha256,
            size,
            "Exported image archive"
        );

        discard_local(env.tool, &destination).await;
        let loaded = env.tool.load(archive.path()).await?;
        let retag_from = loaded.unwrap_or(identity);
        tracing::debug!(identity = %retag_from, "Reloaded image archive");

        env.tool.tag(&retag_from, &destination).await?;
        capture_diagnostics(env.tool, &retag_from, &destination, scratch).await;
        env.tool.push(&destination).await
    }
}

/// Tier 4: evict a stale remote tag, then retry Tier 2 once.
pub struct RemoteTagEviction;

#[async_trait]
impl TierHandler for RemoteTagEviction {
    fn tier(&self) -> Tier {
        Tier::RemoteTagEviction
    }

    fn attempts(&self, _budget: u32) -> u32 {
        1
    }

    async fn run(
        &self,
        env: &TierEnv<'_>,
        job: &TransferJob,
        scratch: &mut TransferScratch,
    ) -> Result<()> {
        let repository = job.destination.repository.as_str();
        let tag = job.destination.tag_or_latest();
        let tier = Tier::RemoteTagEviction.number();

        match env.settings.eviction {
            EvictionPolicy::Never => {
                return Err(MirrorError::TransferFailure {
                    tier,
                    message: "remote tag eviction is disabled".to_string(),
                });
            }
            EvictionPolicy::DigestMismatch => {
                let remote = env.registry.tag_digest(repository, tag).await?;
                match remote {
                    Some(_) if scratch.source_digests.is_empty() => {
                        tracing::warn!(
                            repository,
                            tag,
                            "No source digest known; skipping remote tag eviction"
                        );
                        return Err(MirrorError::TransferFailure {
                            tier,
                            message: format!(
                                "no source digest known to compare with {}:{}; refusing to evict",
                                repository, tag
                            ),
                        });
                    }
                    None => {
                        return Err(MirrorError::TransferFailure {
                            tier,
                            message: format!("no remote tag {}:{} to evict", repository, tag),
                        });
                    }
                    Some(digest) if scratch.knows_digest(&digest) => {
                        return Err(MirrorError::TransferFailure {
                            tier,
                            message: format!(
                                "remote tag {}:{} already points at source digest {}; refusing to evict",
                                repository, tag, digest
                            ),
                        });
                    }
                    Some(digest) => {
                        tracing::warn!(
                            repository,
                            tag,
                            remote_digest = %digest,
                            "Remote tag digest differs from source; evicting"
                        );
                    }
                }
            }
            EvictionPolicy::Always => {
                tracing::warn!(repository, tag, "Evicting remote tag unconditionally");
            }
        }

        env.registry.delete_tag(repository, tag).await?;
        ExplicitPlatformRetry::transfer(env, job, scratch).await
    }
}

/// Fetch the source pinned to an explicit platform and return the local
/// identity to retag from.
async fn fetch_pinned(
    env: &TierEnv<'_>,
    job: &TransferJob,
    scratch: &mut TransferScratch,
) -> Result<String> {
    let source = job.source_ref();
    let destination = job.destination_ref();
    let platform = env.settings.platform.explicit_or_default();

    // Local artifacts may still reference a stale index
    discard_local(env.tool, &destination).await;
    discard_local(env.tool, &source).await;

    let digest = match resolve_platform_digest(env.tool, &source, &platform).await {
        Ok(digest) => digest,
        Err(e) => {
            tracing::warn!(reference = %source, platform = %platform, error = %e, "Platform digest lookup failed; pulling by tag");
            None
        }
    };

    let pull_ref = match &digest {
        Some(d) => {
            scratch.remember_digests([d.clone()]);
            job.source.pinned(d.clone()).full_reference()
        }
        None => source.clone(),
    };
    env.tool.pull(&pull_ref, Some(&platform)).await?;

    if digest.is_some() {
        return Ok(pull_ref);
    }

    // Prefer a content-addressed identity over the mutable tag
    let repo_digests = env.tool.repo_digests(&source).await.unwrap_or_default();
    scratch.remember_digests(repo_digests.iter().cloned());
    if let Some(pinned) = repo_digests.into_iter().find(|d| d.contains("@sha256:")) {
        return Ok(pinned);
    }
    match env.tool.image_id(&source).await {
        Ok(Some(id)) => Ok(id),
        _ => Ok(source),
    }
}

/// Children of the source image index, remembered as source digests.
/// Empty for single-architecture images or when the manifest is unreadable.
async fn inspect_source_index(
    tool: &dyn RegistryTool,
    source: &str,
    scratch: &mut TransferScratch,
) -> Vec<ManifestIndexEntry> {
    let document = match tool.manifest_inspect(source).await {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(reference = source, error = %e, "Source manifest inspection failed");
            return Vec::new();
        }
    };
    match parse_index_entries(&document) {
        Ok(entries) => {
            let entries = entries.unwrap_or_default();
            scratch.remember_digests(entries.iter().map(|e| e.digest.clone()));
            entries
        }
        Err(e) => {
            tracing::warn!(reference = source, error = %e, "Unreadable source manifest");
            Vec::new()
        }
    }
}

/// Best-effort local removal.
async fn discard_local(tool: &dyn RegistryTool, reference: &str) {
    if let Err(e) = tool.remove_local(reference).await {
        tracing::debug!(reference, error = %e, "Local artifact removal failed");
    }
}

/// Record platform and digest state right before a push.
async fn capture_diagnostics(
    tool: &dyn RegistryTool,
    source: &str,
    destination: &str,
    scratch: &mut TransferScratch,
) {
    let source_platform = tool.inspect_platform(source).await.ok().flatten();
    let destination_platform = tool.inspect_platform(destination).await.ok().flatten();
    let source_digests = tool.repo_digests(source).await.unwrap_or_default();

    tracing::debug!(
        source,
        destination,
        source_platform = ?source_platform.as_ref().map(ToString::to_string),
        destination_platform = ?destination_platform.as_ref().map(ToString::to_string),
        source_digests = ?source_digests,
        "Pre-push diagnostics"
    );
    if destination_platform.is_none() {
        tracing::warn!(destination, "Destination artifact has no concrete platform");
    }

    scratch.remember_digests(source_digests.iter().cloned());
    scratch.diagnostics = Some(PushDiagnostics {
        source_platform: source_platform.map(|p| p.to_string()),
        destination_platform: destination_platform.map(|p| p.to_string()),
        source_digests,
    });
}

/// Image archive in a private temporary directory, removed on drop.
pub struct ScopedArchive {
    _dir: TempDir,
    path: PathBuf,
}

impl ScopedArchive {
    pub fn create(work_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let dir = tempfile::Builder::new()
            .prefix("archive-")
            .tempdir_in(work_dir)?;
        let path = dir.path().join("image.tar");
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 and size of the archive. An empty archive is an error.
    pub fn checksum(&self) -> Result<(String, u64)> {
        let mut file = File::open(&self.path)?;
        let mut hasher = Sha256::new();
        let size = std::io::copy(&mut file, &mut hasher)?;
        if size == 0 {
            return Err(MirrorError::TransferFailure {
                tier: Tier::MaterializeReload.number(),
                message: format!("exported archive {} is empty", self.path.display()),
            });
        }
        Ok((hex::encode(hasher.finalize()), size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scoped_archive_removed_on_drop() {
        let work = TempDir::new().unwrap();
        let archive_dir;
        {
            let archive = ScopedArchive::create(work.path()).unwrap();
            std::fs::write(archive.path(), b"layer data").unwrap();
            archive_dir = archive.path().parent().unwrap().to_path_buf();
            assert!(archive_dir.exists());
        }
        assert!(!archive_dir.exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scoped_archive_checksum() {
        let work = TempDir::new().unwrap();
        let archive = ScopedArchive::create(work.path()).unwrap();
        std::fs::write(archive.path(), b"abc").unwrap();
        let (sha, size) = archive.checksum().unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            sha,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_scoped_archive_rejects_empty() {
        let work = TempDir::new().unwrap();
        let archive = ScopedArchive::create(work.path()).unwrap();
        std::fs::write(archive.path(), b"").unwrap();
        let err = archive.checksum().unwrap_err();
        assert!(matches!(err, MirrorError::TransferFailure { tier: 3, .. }));
    }

    #[test]
    fn test_scratch_knows_repo_digest_suffix() {
        let mut scratch = TransferScratch::default();
        scratch.remember_digests(["quay.io/org/app@sha256:aaa".to_string()]);
        assert!(scratch.knows_digest("sha256:aaa"));
        assert!(!scratch.knows_digest("sha256:bbb"));
    }

    #[test]
    fn test_tier_four_single_attempt() {
        assert_eq!(RemoteTagEviction.attempts(3), 1);
        assert_eq!(MaterializeReload.attempts(3), 3);
    }
}
