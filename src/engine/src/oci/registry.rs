//! Registry management API client.
//!
//! Talks to the OCI Distribution HTTP API of the destination registry for
//! the few management calls the mirror needs: repository existence, remote
//! tag digests and tag deletion. Image content never moves through here.

use std::time::Duration;

use async_trait::async_trait;
use chart_mirror_core::error::{MirrorError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::{Client, Reference};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::credentials::RegistryAuth;

/// Manifest media types accepted when resolving a tag.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json";

/// Management operations on the destination registry.
#[async_trait]
pub trait RegistryManager: Send + Sync {
    /// Whether `repository` exists.
    async fn repository_exists(&self, repository: &str) -> Result<bool>;

    /// Make sure `repository` exists.
    async fn create_repository(&self, repository: &str) -> Result<()>;

    /// Delete `repository:tag`. Deleting an absent tag is not an error.
    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()>;

    /// Digest `repository:tag` currently points at, `None` if the tag is absent.
    async fn tag_digest(&self, repository: &str, tag: &str) -> Result<Option<String>>;
}

/// Token endpoint response (either field name is in use).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

/// [`RegistryManager`] over the OCI Distribution API.
pub struct DistributionRegistry {
    host: String,
    scheme: &'static str,
    http: reqwest::Client,
    oci: Client,
    auth: RegistryAuth,
    timeout: Duration,
}

impl DistributionRegistry {
    pub fn new(host: impl Into<String>, auth: RegistryAuth, timeout: Duration) -> Result<Self> {
        let host = host.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MirrorError::RegistryError {
                registry: host.clone(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        let oci = Client::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });

        Ok(Self {
            host,
            scheme: "https",
            http,
            oci,
            auth,
            timeout,
        })
    }

    /// Speak plain HTTP (local test registries).
    pub fn insecure(mut self) -> Self {
        self.scheme = "http";
        self.oci = Client::new(ClientConfig {
            protocol: ClientProtocol::Http,
            ..Default::default()
        });
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}://{}/v2/{}", self.scheme, self.host, path)
    }

    fn registry_error(&self, message: impl Into<String>) -> MirrorError {
        MirrorError::RegistryError {
            registry: self.host.clone(),
            message: message.into(),
        }
    }

    fn map_http_error(&self, operation: &str, e: reqwest::Error) -> MirrorError {
        if e.is_timeout() {
            MirrorError::TimeoutFailure {
                operation: operation.to_string(),
                seconds: self.timeout.as_secs(),
            }
        } else {
            self.registry_error(format!("{} failed: {}", operation, e))
        }
    }

    fn with_basic(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.credentials() {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    /// Send a request, answering a bearer challenge once if the registry
    /// issues one.
    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        repository: &str,
        actions: &str,
    ) -> Result<Response> {
        let url = self.url(path);
        let first = self
            .with_basic(self.http.request(method.clone(), &url))
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| self.map_http_error(operation, e))?;

        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let challenge = first
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge);
        let challenge = match challenge {
            Some(c) => c,
            None => {
                return Err(MirrorError::AuthenticationFailure {
                    registry: self.host.clone(),
                    message: format!("{} rejected credentials", operation),
                })
            }
        };

        let token = self
            .fetch_token(operation, &challenge, repository, actions)
            .await?;
        self.http
            .request(method, &url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| self.map_http_error(operation, e))
    }

    async fn fetch_token(
        &self,
        operation: &str,
        challenge: &BearerChallenge,
        repository: &str,
        actions: &str,
    ) -> Result<String> {
        let scope = format!("repository:{}:{}", repository, actions);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        let response = self
            .with_basic(self.http.get(&challenge.realm).query(&query))
            .send()
            .await
            .map_err(|e| self.map_http_error(operation, e))?;
        if !response.status().is_success() {
            return Err(MirrorError::AuthenticationFailure {
                registry: self.host.clone(),
                message: format!("token request returned {}", response.status()),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.map_http_error(operation, e))?;
        body.token
            .or(body.access_token)
            .ok_or_else(|| MirrorError::AuthenticationFailure {
                registry: self.host.clone(),
                message: "token response carried no token".to_string(),
            })
    }

    /// Digest through oci-distribution when the HEAD response omits it.
    async fn fetch_digest_via_client(&self, repository: &str, tag: &str) -> Result<String> {
        let reference: Reference = format!("{}/{}:{}", self.host, repository, tag)
            .parse()
            .map_err(|e| {
                MirrorError::InvalidReference(format!("{}/{}:{}: {}", self.host, repository, tag, e))
            })?;
        let auth = self.auth.to_oci_auth();
        bounded(
            "fetch-manifest-digest",
            self.timeout,
            self.oci.fetch_manifest_digest(&reference, &auth),
        )
        .await?
        .map_err(|e| self.registry_error(format!("Failed to fetch manifest digest: {}", e)))
    }
}

/// Run `fut` under `limit`, mapping expiry to a timeout failure.
async fn bounded<F: std::future::Future>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MirrorError::TimeoutFailure {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        })
}

#[async_trait]
impl RegistryManager for DistributionRegistry {
    async fn repository_exists(&self, repository: &str) -> Result<bool> {
        let path = format!("{}/tags/list", repository);
        let response = self
            .send("repository-exists", Method::GET, &path, repository, "pull")
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(self.registry_error(format!("tag listing for {} returned {}", repository, s))),
        }
    }

    async fn create_repository(&self, repository: &str) -> Result<()> {
        if self.repository_exists(repository).await? {
            tracing::debug!(registry = %self.host, repository, "Repository exists");
            return Ok(());
        }
        // Distribution registries create repositories on first push
        tracing::info!(
            registry = %self.host,
            repository,
            "Repository will be created on first push"
        );
        Ok(())
    }

    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        let digest = match self.tag_digest(repository, tag).await? {
            Some(d) => d,
            None => {
                tracing::debug!(registry = %self.host, repository, tag, "Tag absent; nothing to delete");
                return Ok(());
            }
        };

        let path = format!("{}/manifests/{}", repository, digest);
        let response = self
            .send("delete-tag", Method::DELETE, &path, repository, "pull,push,delete")
            .await?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => {
                tracing::info!(registry = %self.host, repository, tag, digest = %digest, "Deleted remote tag");
                Ok(())
            }
            StatusCode::METHOD_NOT_ALLOWED => Err(self.registry_error(format!(
                "registry does not allow deleting {}:{}",
                repository, tag
            ))),
            s => Err(self.registry_error(format!(
                "deleting {}:{} returned {}",
                repository, tag, s
            ))),
        }
    }

    async fn tag_digest(&self, repository: &str, tag: &str) -> Result<Option<String>> {
        let path = format!("{}/manifests/{}", repository, tag);
        let response = self
            .send("tag-digest", Method::HEAD, &path, repository, "pull")
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let header = response
                    .headers()
                    .get("Docker-Content-Digest")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                match header {
                    Some(digest) => Ok(Some(digest)),
                    None => self.fetch_digest_via_client(repository, tag).await.map(Some),
                }
            }
            s => Err(self.registry_error(format!(
                "manifest lookup for {}:{} returned {}",
                repository, tag, s
            ))),
        }
    }
}

/// Parse `Bearer realm="...",service="...",scope="..."`.
fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.trim();
    let rest = rest
        .strip_prefix("Bearer ")
        .or_else(|| rest.strip_prefix("bearer "))?;

    let mut realm = None;
    let mut service = None;
    for part in split_params(rest) {
        let (key, value) = match part.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

/// Split challenge parameters on commas outside quotes.
fn split_params(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_maps_expiry_to_timeout() {
        let err = bounded(
            "fetch-manifest-digest",
            Duration::from_millis(10),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            MirrorError::TimeoutFailure { ref operation, .. } if operation == "fetch-manifest-digest"
        ));

        assert_eq!(bounded("x", Duration::from_secs(1), async { 7 }).await.unwrap(), 7);
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
    }

    #[test]
    fn test_parse_bearer_challenge_scope_with_comma() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://ghcr.io/token",scope="repository:org/app:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://ghcr.io/token");
        assert_eq!(challenge.service, None);
    }

    #[test]
    fn test_parse_basic_challenge_is_none() {
        assert_eq!(parse_bearer_challenge(r#"Basic realm="registry""#), None);
        assert_eq!(parse_bearer_challenge(r#"Bearer service="x""#), None);
    }

    #[test]
    fn test_url_building() {
        let registry = DistributionRegistry::new(
            "mirror.example.com:5000",
            RegistryAuth::anonymous(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            registry.url("team/app/tags/list"),
            "https://mirror.example.com:5000/v2/team/app/tags/list"
        );
        assert_eq!(
            registry.insecure().url("app/manifests/1.0"),
            "http://mirror.example.com:5000/v2/app/manifests/1.0"
        );
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_registry_error() {
        let registry = DistributionRegistry::new(
            "127.0.0.1:1",
            RegistryAuth::anonymous(),
            Duration::from_secs(2),
        )
        .unwrap()
        .insecure();
        let err = registry.tag_digest("app", "1.0").await.unwrap_err();
        assert!(matches!(
            err,
            MirrorError::RegistryError { .. } | MirrorError::TimeoutFailure { .. }
        ));
    }
}
