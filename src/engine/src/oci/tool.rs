//! RegistryTool - Trait for the external image transfer tool.
//!
//! The engine never speaks the registry protocol itself; it drives an
//! existing tool through this seam. Every method is one tool invocation
//! bounded by a timeout, and a failing invocation surfaces as an error
//! carrying the tool's diagnostic output.

use std::path::Path;

use async_trait::async_trait;
use chart_mirror_core::error::Result;
use chart_mirror_core::platform::PlatformSpec;

/// Operations the transfer engine needs from a registry transfer tool.
#[async_trait]
pub trait RegistryTool: Send + Sync {
    /// Pull `reference` into local storage, optionally pinned to a platform.
    async fn pull(&self, reference: &str, platform: Option<&PlatformSpec>) -> Result<()>;

    /// Push a locally tagged `reference` to its registry.
    async fn push(&self, reference: &str) -> Result<()>;

    /// Tag local artifact `source` as `target`.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Registry-to-registry copy without local materialization.
    async fn copy(&self, source: &str, target: &str, platform: Option<&PlatformSpec>)
        -> Result<()>;

    /// Fetch the raw manifest document (JSON) for a remote reference.
    async fn manifest_inspect(&self, reference: &str) -> Result<String>;

    /// Export a local artifact to an archive at `path`.
    async fn save(&self, reference: &str, path: &Path) -> Result<()>;

    /// Import an archive. Returns the loaded image identity when reported.
    async fn load(&self, path: &Path) -> Result<Option<String>>;

    /// Remove a local artifact. Removing something absent is not an error.
    async fn remove_local(&self, reference: &str) -> Result<()>;

    /// Concrete platform of a local artifact, `None` when it has none.
    async fn inspect_platform(&self, reference: &str) -> Result<Option<PlatformSpec>>;

    /// Repository digests (`repo@sha256:...`) recorded for a local artifact.
    async fn repo_digests(&self, reference: &str) -> Result<Vec<String>>;

    /// Local content identity (e.g. `sha256:...` image ID).
    async fn image_id(&self, reference: &str) -> Result<Option<String>>;

    /// Log in to a registry host.
    async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()>;
}
