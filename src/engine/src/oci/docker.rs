//! Docker CLI implementation of [`RegistryTool`].
//!
//! Every operation spawns one `docker` process bounded by the configured
//! command timeout. A sandboxed `DOCKER_CONFIG` directory keeps logins away
//! from the operator's own Docker configuration.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chart_mirror_core::error::{MirrorError, Result};
use chart_mirror_core::platform::PlatformSpec;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::tool::RegistryTool;

/// Default docker binary name, resolved through `PATH`.
const DOCKER_BINARY: &str = "docker";

/// Registry tool backed by the `docker` CLI.
pub struct DockerCli {
    binary: PathBuf,
    timeout: Duration,
    config_dir: Option<PathBuf>,
}

impl DockerCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from(DOCKER_BINARY),
            timeout,
            config_dir: None,
        }
    }

    /// Use an alternative docker-compatible binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Point `DOCKER_CONFIG` at a dedicated directory.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Run one docker invocation and return its stdout.
    async fn run(&self, operation: &str, args: &[&str], stdin: Option<&str>) -> Result<String> {
        tracing::debug!(operation, args = ?args, "Running docker");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config_dir {
            tokio::fs::create_dir_all(dir).await?;
            cmd.env("DOCKER_CONFIG", dir);
        }

        let mut child = cmd.spawn().map_err(|e| MirrorError::ToolError {
            operation: operation.to_string(),
            message: format!("failed to spawn {}: {}", self.binary.display(), e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Close stdin so the tool sees EOF
            drop(pipe);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(operation, seconds = self.timeout.as_secs(), "docker timed out");
                return Err(MirrorError::TimeoutFailure {
                    operation: operation.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(MirrorError::ToolError {
                operation: operation.to_string(),
                message: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    message
                ),
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl RegistryTool for DockerCli {
    async fn pull(&self, reference: &str, platform: Option<&PlatformSpec>) -> Result<()> {
        let platform = platform.map(ToString::to_string);
        let mut args = vec!["pull"];
        if let Some(p) = &platform {
            args.extend(["--platform", p.as_str()]);
        }
        args.push(reference);
        self.run("pull", &args, None).await.map(|_| ())
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.run("push", &["push", reference], None).await.map(|_| ())
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.run("tag", &["tag", source, target], None)
            .await
            .map(|_| ())
    }

    async fn copy(
        &self,
        source: &str,
        target: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<()> {
        match platform {
            // imagetools copies whole indexes; a single platform needs its digest
            Some(p) => {
                let document = self.manifest_inspect(source).await?;
                let digest = super::platform::select_platform_digest(&document, p)?;
                let src = match digest {
                    Some(d) => format!("{}@{}", super::reference::strip_digest(source), d),
                    None => source.to_string(),
                };
                self.run(
                    "copy",
                    &["buildx", "imagetools", "create", "--tag", target, &src],
                    None,
                )
                .await
                .map(|_| ())
            }
            None => self
                .run(
                    "copy",
                    &["buildx", "imagetools", "create", "--tag", target, source],
                    None,
                )
                .await
                .map(|_| ()),
        }
    }

    async fn manifest_inspect(&self, reference: &str) -> Result<String> {
        self.run("manifest-inspect", &["manifest", "inspect", reference], None)
            .await
    }

    async fn save(&self, reference: &str, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.run("save", &["save", "-o", path.as_ref(), reference], None)
            .await
            .map(|_| ())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        let path = path.to_string_lossy();
        let stdout = self.run("load", &["load", "-i", path.as_ref()], None).await?;
        Ok(parse_loaded_identity(&stdout))
    }

    async fn remove_local(&self, reference: &str) -> Result<()> {
        // `rmi -f` still fails on an unknown image; absence is fine here
        match self.run("remove", &["rmi", "-f", reference], None).await {
            Ok(_) => Ok(()),
            Err(MirrorError::ToolError { message, .. }) if message.contains("No such image") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn inspect_platform(&self, reference: &str) -> Result<Option<PlatformSpec>> {
        let stdout = self
            .run(
                "inspect-platform",
                &[
                    "image",
                    "inspect",
                    "--format",
                    "{{.Os}}/{{.Architecture}}",
                    reference,
                ],
                None,
            )
            .await?;
        Ok(parse_platform_line(&stdout))
    }

    async fn repo_digests(&self, reference: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(
                "inspect-digests",
                &[
                    "image",
                    "inspect",
                    "--format",
                    "{{json .RepoDigests}}",
                    reference,
                ],
                None,
            )
            .await?;
        let digests: Option<Vec<String>> = serde_json::from_str(stdout.trim())?;
        Ok(digests.unwrap_or_default())
    }

    async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        let stdout = self
            .run(
                "inspect-id",
                &["image", "inspect", "--format", "{{.Id}}", reference],
                None,
            )
            .await?;
        let id = stdout.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    async fn login(&self, registry: &str, username: &str, password: &str) -> Result<()> {
        self.run(
            "login",
            &["login", "--username", username, "--password-stdin", registry],
            Some(password),
        )
        .await
        .map(|_| ())
        .map_err(|e| MirrorError::AuthenticationFailure {
            registry: registry.to_string(),
            message: e.to_string(),
        })
    }
}

/// Parse `os/arch` as printed by `docker image inspect`.
fn parse_platform_line(output: &str) -> Option<PlatformSpec> {
    let line = output.trim();
    let (os, arch) = line.split_once('/')?;
    if os.is_empty() || arch.is_empty() || os == "<no value>" || arch == "<no value>" {
        return None;
    }
    Some(PlatformSpec::new(os, arch))
}

/// Extract the identity from `docker load` output.
///
/// Recognizes `Loaded image: <ref>` and `Loaded image ID: <id>`; the last
/// matching line wins.
fn parse_loaded_identity(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("Loaded image ID:")
                .or_else(|| line.strip_prefix("Loaded image:"))
                .map(|rest| rest.trim().to_string())
        })
        .filter(|identity| !identity.is_empty())
        .last()
}
