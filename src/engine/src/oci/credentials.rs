//! Registry credentials and the login gate.
//!
//! Credentials resolve per registry host in this order: the run
//! configuration, the persistent store at
//! `~/.chart-mirror/auth/credentials.json`, the `REGISTRY_USERNAME` /
//! `REGISTRY_PASSWORD` environment variables, then anonymous access.
//! The store uses atomic writes (write tmp, rename).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chart_mirror_core::config::RegistryCredentials;
use chart_mirror_core::error::{MirrorError, Result};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::tool::RegistryTool;

/// Per-registry credential entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

/// Persistent credential file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    registries: HashMap<String, CredentialEntry>,
}

/// Persistent credential store for container registries.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at the default path (`~/.chart-mirror/auth/credentials.json`).
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            MirrorError::Other("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self {
            path: home
                .join(".chart-mirror")
                .join("auth")
                .join("credentials.json"),
        })
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store credentials for a registry. Overwrites an existing entry.
    pub fn store(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            normalize_registry(registry),
            CredentialEntry {
                username: username.to_string(),
                password: password.to_string(),
            },
        );
        self.save(&file)
    }

    /// Credentials for a registry as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        Ok(file
            .registries
            .get(&normalize_registry(registry))
            .map(|e| (e.username.clone(), e.password.clone())))
    }

    /// Remove credentials for a registry. Returns true if an entry existed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file
            .registries
            .remove(&normalize_registry(registry))
            .is_some();
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, file: &CredentialFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let data = serde_json::to_string_pretty(file)?;
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            MirrorError::Other(format!(
                "Failed to rename credential store {} -> {}: {}",
                tmp_path.display(),
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

/// Normalize registry hosts ("docker.io" and "registry-1.docker.io" map to
/// "index.docker.io").
pub fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    if r == "docker.io" || r == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        r
    }
}

/// Authentication for one registry host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Resolve credentials for `registry`: configuration, then the store,
    /// then `fallback`, then anonymous.
    ///
    /// Callers pass the environment credentials as `fallback` only for the
    /// destination registry.
    pub fn resolve(
        registry: &str,
        configured: &HashMap<String, RegistryCredentials>,
        store: Option<&CredentialStore>,
        fallback: Option<&RegistryAuth>,
    ) -> Self {
        let host = normalize_registry(registry);
        if let Some(creds) = configured
            .iter()
            .find(|(key, _)| normalize_registry(key) == host)
            .map(|(_, creds)| creds)
        {
            return Self::basic(&creds.username, &creds.password);
        }
        if let Some(store) = store {
            match store.get(registry) {
                Ok(Some((username, password))) => return Self::basic(username, password),
                Ok(None) => {}
                Err(e) => tracing::warn!(registry, error = %e, "Credential store unreadable"),
            }
        }
        fallback.cloned().unwrap_or_else(Self::anonymous)
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some((u.as_str(), p.as_str())),
            _ => None,
        }
    }

    /// Convert to the oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Ensures the transfer tool is authenticated against a registry host.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Make sure subsequent tool calls against `registry` are authenticated.
    /// Idempotent; a failure is an authentication failure for the attempt.
    async fn ensure_login(&self, registry: &str) -> Result<()>;
}

/// Logs the transfer tool in once per host per run.
///
/// Environment credentials are only offered to the destination registry.
pub struct ToolLoginGate {
    tool: Arc<dyn RegistryTool>,
    target: String,
    configured: HashMap<String, RegistryCredentials>,
    store: Option<CredentialStore>,
    target_fallback: Option<RegistryAuth>,
    logged_in: Mutex<HashSet<String>>,
}

impl ToolLoginGate {
    pub fn new(
        tool: Arc<dyn RegistryTool>,
        target_registry: &str,
        configured: HashMap<String, RegistryCredentials>,
        store: Option<CredentialStore>,
    ) -> Self {
        Self {
            tool,
            target: normalize_registry(target_registry),
            configured,
            store,
            target_fallback: RegistryAuth::from_env(),
            logged_in: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the destination-only fallback read from the environment.
    pub fn with_target_fallback(mut self, fallback: Option<RegistryAuth>) -> Self {
        self.target_fallback = fallback;
        self
    }

    /// Forget a host so the next attempt logs in again.
    pub fn invalidate(&self, registry: &str) {
        self.logged_in.lock().remove(&normalize_registry(registry));
    }
}

#[async_trait]
impl AuthGate for ToolLoginGate {
    async fn ensure_login(&self, registry: &str) -> Result<()> {
        let host = normalize_registry(registry);
        let cached = self.logged_in.lock().contains(&host);
        if cached {
            return Ok(());
        }

        let fallback = if host == self.target {
            self.target_fallback.as_ref()
        } else {
            None
        };
        let auth = RegistryAuth::resolve(registry, &self.configured, self.store.as_ref(), fallback);
        match auth.credentials() {
            Some((username, password)) => {
                tracing::info!(registry, username, "Logging in to registry");
                if let Err(e) = self.tool.login(registry, username, password).await {
                    return Err(match e {
                        e @ MirrorError::AuthenticationFailure { .. } => e,
                        other => MirrorError::AuthenticationFailure {
                            registry: registry.to_string(),
                            message: other.to_string(),
                        },
                    });
                }
            }
            None => tracing::debug!(registry, "No credentials; using anonymous access"),
        }

        self.logged_in.lock().insert(host);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTool;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("credentials.json"))
    }

    #[test]
    fn test_store_and_get() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.store("ghcr.io", "user1", "pass1").unwrap();
        assert_eq!(
            store.get("ghcr.io").unwrap(),
            Some(("user1".to_string(), "pass1".to_string()))
        );
        assert_eq!(store.get("quay.io").unwrap(), None);
    }

    #[test]
    fn test_docker_hub_aliases_share_entry() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.store("docker.io", "user", "pass").unwrap();
        assert!(store.get("index.docker.io").unwrap().is_some());
        assert!(store.remove("registry-1.docker.io").unwrap());
        assert!(!store.remove("docker.io").unwrap());
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.store("ghcr.io", "u", "p").unwrap();
        assert!(dir.path().join("credentials.json").exists());
        assert!(!dir.path().join("credentials.tmp").exists());
    }

    #[test]
    fn test_resolve_prefers_configuration() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.store("ghcr.io", "stored", "stored-pass").unwrap();

        let mut configured = HashMap::new();
        configured.insert(
            "GHCR.io".to_string(),
            RegistryCredentials {
                username: "configured".to_string(),
                password: "secret".to_string(),
            },
        );

        let auth = RegistryAuth::resolve("ghcr.io", &configured, Some(&store), None);
        assert_eq!(auth.credentials(), Some(("configured", "secret")));
    }

    #[test]
    fn test_resolve_falls_back_to_store() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.store("ghcr.io", "stored", "stored-pass").unwrap();

        let auth = RegistryAuth::resolve("ghcr.io", &HashMap::new(), Some(&store), None);
        assert_eq!(auth.credentials(), Some(("stored", "stored-pass")));
    }

    #[test]
    fn test_resolve_uses_fallback_last() {
        let fallback = RegistryAuth::basic("env-user", "env-pass");
        let auth = RegistryAuth::resolve("ghcr.io", &HashMap::new(), None, Some(&fallback));
        assert_eq!(auth.credentials(), Some(("env-user", "env-pass")));
        assert!(RegistryAuth::resolve("ghcr.io", &HashMap::new(), None, None).is_anonymous());
    }

    #[test]
    fn test_to_oci_auth() {
        assert!(matches!(
            RegistryAuth::anonymous().to_oci_auth(),
            OciRegistryAuth::Anonymous
        ));
        assert!(matches!(
            RegistryAuth::basic("u", "p").to_oci_auth(),
            OciRegistryAuth::Basic(_, _)
        ));
    }

    #[tokio::test]
    async fn test_gate_logs_in_once_per_host() {
        let tool = Arc::new(FakeTool::new());
        let mut configured = HashMap::new();
        configured.insert(
            "mirror.example.com".to_string(),
            RegistryCredentials {
                username: "robot".to_string(),
                password: "token".to_string(),
            },
        );
        let gate = ToolLoginGate::new(tool.clone(), "mirror.example.com", configured, None);

        gate.ensure_login("mirror.example.com").await.unwrap();
        gate.ensure_login("mirror.example.com").await.unwrap();
        assert_eq!(tool.calls_matching("login").len(), 1);

        gate.invalidate("mirror.example.com");
        gate.ensure_login("mirror.example.com").await.unwrap();
        assert_eq!(tool.calls_matching("login").len(), 2);
    }

    #[tokio::test]
    async fn test_gate_login_failure_is_authentication() {
        let tool = Arc::new(FakeTool::new());
        tool.fail_op("login", 1);
        let mut configured = HashMap::new();
        configured.insert(
            "mirror.example.com".to_string(),
            RegistryCredentials {
                username: "robot".to_string(),
                password: "wrong".to_string(),
            },
        );
        let gate = ToolLoginGate::new(tool, "mirror.example.com", configured, None);

        let err = gate.ensure_login("mirror.example.com").await.unwrap_err();
        assert!(matches!(err, MirrorError::AuthenticationFailure { .. }));
        // The failed host is not cached; the next attempt retries the login
        gate.ensure_login("mirror.example.com").await.unwrap();
    }

    #[tokio::test]
    async fn test_gate_offers_fallback_only_to_target() {
        let tool = Arc::new(FakeTool::new());
        let gate = ToolLoginGate::new(tool.clone(), "Mirror.Example.com", HashMap::new(), None)
            .with_target_fallback(Some(RegistryAuth::basic("mirror-robot", "token")));

        gate.ensure_login("quay.io").await.unwrap();
        gate.ensure_login("ghcr.io").await.unwrap();
        gate.ensure_login("mirror.example.com").await.unwrap();

        assert_eq!(
            tool.calls_matching("login"),
            vec!["login mirror.example.com mirror-robot".to_string()]
        );
    }
}
