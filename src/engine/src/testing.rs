//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chart_mirror_core::error::{MirrorError, Result};
use chart_mirror_core::platform::PlatformSpec;
use parking_lot::Mutex;

use crate::oci::credentials::AuthGate;
use crate::oci::registry::RegistryManager;
use crate::oci::tool::RegistryTool;

const SINGLE_ARCH_MANIFEST: &str = r#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","layers":[]}"#;

enum ScriptedFailure {
    Tool(String),
    Timeout(u64),
}

#[derive(Default)]
struct ToolState {
    calls: Vec<String>,
    failures: HashMap<String, (usize, ScriptedFailure)>,
    manifests: HashMap<String, String>,
    pull_platforms: HashMap<String, Option<PlatformSpec>>,
    local_platforms: HashMap<String, Option<PlatformSpec>>,
    repo_digests: HashMap<String, Vec<String>>,
    loaded_identity: Option<String>,
    empty_saves: bool,
}

/// In-memory [`RegistryTool`] recording every call as `"<op> <args...>"`.
#[derive(Default)]
pub struct FakeTool {
    state: Mutex<ToolState>,
}

impl FakeTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls of `op`.
    pub fn fail_op(&self, op: &str, count: usize) {
        self.fail_op_with(op, count, "scripted failure");
    }

    pub fn fail_op_with(&self, op: &str, count: usize, message: &str) {
        self.state.lock().failures.insert(
            op.to_string(),
            (count, ScriptedFailure::Tool(message.to_string())),
        );
    }

    /// Time out the next `count` calls of `op`.
    pub fn time_out_op(&self, op: &str, count: usize, seconds: u64) {
        self.state
            .lock()
            .failures
            .insert(op.to_string(), (count, ScriptedFailure::Timeout(seconds)));
    }

    pub fn set_manifest(&self, reference: &str, document: &str) {
        self.state
            .lock()
            .manifests
            .insert(reference.to_string(), document.to_string());
    }

    /// Platform the local artifact reports after a pull requesting `requested`.
    pub fn set_platform_for_pull(
        &self,
        requested: Option<PlatformSpec>,
        effective: Option<PlatformSpec>,
    ) {
        self.state
            .lock()
            .pull_platforms
            .insert(platform_label(requested.as_ref()), effective);
    }

    pub fn set_repo_digests(&self, reference: &str, digests: &[&str]) {
        self.state.lock().repo_digests.insert(
            reference.to_string(),
            digests.iter().map(|d| d.to_string()).collect(),
        );
    }

    pub fn set_loaded_identity(&self, identity: &str) {
        self.state.lock().loaded_identity = Some(identity.to_string());
    }

    pub fn produce_empty_archives(&self) {
        self.state.lock().empty_saves = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Recorded calls of one operation.
    pub fn calls_matching(&self, op: &str) -> Vec<String> {
        let prefix = format!("{} ", op);
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix) || c.as_str() == op)
            .cloned()
            .collect()
    }

    /// Record a call and consume a scripted failure if one is pending.
    fn enter(&self, op: &str, call: String) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some((remaining, failure)) = state.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(match failure {
                    ScriptedFailure::Tool(message) => MirrorError::ToolError {
                        operation: op.to_string(),
                        message: message.clone(),
                    },
                    ScriptedFailure::Timeout(seconds) => MirrorError::TimeoutFailure {
                        operation: op.to_string(),
                        seconds: *seconds,
                    },
                });
            }
        }
        Ok(())
    }
}

fn platform_label(platform: Option<&PlatformSpec>) -> String {
    platform
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

#[async_trait]
impl RegistryTool for FakeTool {
    async fn pull(&self, reference: &str, platform: Option<&PlatformSpec>) -> Result<()> {
        let label = platform_label(platform);
        self.enter("pull", format!("pull {} {}", reference, label))?;
        let mut state = self.state.lock();
        let effective = match state.pull_platforms.get(&label) {
            Some(effective) => effective.clone(),
            None => Some(platform.cloned().unwrap_or_else(PlatformSpec::linux_amd64)),
        };
        state.local_platforms.insert(reference.to_string(), effective);
        Ok(())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.enter("push", format!("push {}", reference))
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.enter("tag", format!("tag {} {}", source, target))?;
        let mut state = self.state.lock();
        if let Some(platform) = state.local_platforms.get(source).cloned() {
            state.local_platforms.insert(target.to_string(), platform);
        }
        Ok(())
    }

    async fn copy(
        &self,
        source: &str,
        target: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<()> {
        self.enter(
            "copy",
            format!("copy {} {} {}", source, target, platform_label(platform)),
        )
    }

    async fn manifest_inspect(&self, reference: &str) -> Result<String> {
        self.enter("manifest", format!("manifest {}", reference))?;
        Ok(self
            .state
            .lock()
            .manifests
            .get(reference)
            .cloned()
            .unwrap_or_else(|| SINGLE_ARCH_MANIFEST.to_string()))
    }

    async fn save(&self, reference: &str, path: &Path) -> Result<()> {
        self.enter("save", format!("save {}", reference))?;
        let empty = self.state.lock().empty_saves;
        let content: &[u8] = if empty { b"" } else { b"fake image archive" };
        std::fs::write(path, content)?;
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        self.enter("load", format!("load {}", path.display()))?;
        Ok(self.state.lock().loaded_identity.clone())
    }

    async fn remove_local(&self, reference: &str) -> Result<()> {
        self.enter("remove", format!("remove {}", reference))?;
        self.state.lock().local_platforms.remove(reference);
        Ok(())
    }

    async fn inspect_platform(&self, reference: &str) -> Result<Option<PlatformSpec>> {
        self.enter("inspect", format!("inspect {}", reference))?;
        Ok(self
            .state
            .lock()
            .local_platforms
            .get(reference)
            .cloned()
            .unwrap_or_else(|| Some(PlatformSpec::linux_amd64())))
    }

    async fn repo_digests(&self, reference: &str) -> Result<Vec<String>> {
        self.enter("digests", format!("digests {}", reference))?;
        Ok(self
            .state
            .lock()
            .repo_digests
            .get(reference)
            .cloned()
            .unwrap_or_default())
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        self.enter("image-id", format!("image-id {}", reference))?;
        Ok(None)
    }

    async fn login(&self, registry: &str, username: &str, _password: &str) -> Result<()> {
        self.enter("login", format!("login {} {}", registry, username))
    }
}

/// In-memory [`RegistryManager`].
#[derive(Default)]
pub struct FakeRegistry {
    tag_digests: Mutex<HashMap<(String, String), String>>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<(String, String)>>,
    fail_create: Mutex<bool>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tag_digest(&self, repository: &str, tag: &str, digest: &str) {
        self.tag_digests.lock().insert(
            (repository.to_string(), tag.to_string()),
            digest.to_string(),
        );
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock() = true;
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl RegistryManager for FakeRegistry {
    async fn repository_exists(&self, repository: &str) -> Result<bool> {
        Ok(self.created.lock().iter().any(|r| r == repository))
    }

    async fn create_repository(&self, repository: &str) -> Result<()> {
        if *self.fail_create.lock() {
            return Err(MirrorError::RegistryError {
                registry: "fake".to_string(),
                message: format!("cannot create {}", repository),
            });
        }
        self.created.lock().push(repository.to_string());
        Ok(())
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        self.tag_digests
            .lock()
            .remove(&(repository.to_string(), tag.to_string()));
        self.deleted
            .lock()
            .push((repository.to_string(), tag.to_string()));
        Ok(())
    }

    async fn tag_digest(&self, repository: &str, tag: &str) -> Result<Option<String>> {
        Ok(self
            .tag_digests
            .lock()
            .get(&(repository.to_string(), tag.to_string()))
            .cloned())
    }
}

/// [`AuthGate`] recording every host it is asked about.
#[derive(Default)]
pub struct FakeAuth {
    hosts: Mutex<Vec<String>>,
    failures: Mutex<usize>,
}

impl FakeAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize) {
        *self.failures.lock() = count;
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().clone()
    }
}

#[async_trait]
impl AuthGate for FakeAuth {
    async fn ensure_login(&self, registry: &str) -> Result<()> {
        self.hosts.lock().push(registry.to_string());
        let mut failures = self.failures.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(MirrorError::AuthenticationFailure {
                registry: registry.to_string(),
                message: "scripted login failure".to_string(),
            });
        }
        Ok(())
    }
}
