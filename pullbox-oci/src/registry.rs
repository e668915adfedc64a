use std::path::Path;
use std::time::Duration;

use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::error::{RegistryError, Result};
use crate::manifest::{ImageManifest, ManifestDocument, Platform, MANIFEST_ACCEPT};

/// Buffer size used when writing blob bodies to disk.
pub const BLOB_CHUNK_SIZE: usize = 8 * 1024;

/// Response header carrying the registry's digest of a manifest.
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Endpoints and timeouts for one registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the distribution API, without the `/v2` suffix.
    pub registry_url: String,
    /// Anonymous token endpoint.
    pub auth_url: String,
    /// `service` parameter sent to the token endpoint.
    pub service: String,
    /// Timeout for token and manifest requests.
    pub request_timeout: Duration,
    /// Idle timeout for layer blob transfers: the longest wait for headers
    /// or for the next body chunk.
    pub layer_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_url: "https://registry-1.docker.io".to_string(),
            auth_url: "https://auth.docker.io/token".to_string(),
            service: "registry.docker.io".to_string(),
            request_timeout: Duration::from_secs(30),
            layer_timeout: Duration::from_secs(300),
        }
    }
}

/// Normalise a Docker Hub image name into a repository path.
///
/// Single-component names are official images and live under `library/`.
pub fn repository_path(image_name: &str) -> String {
    if image_name.contains('/') {
        image_name.to_string()
    } else {
        format!("library/{}", image_name)
    }
}

// ---------------------------------------------------------------------------
// RegistryClient
// ---------------------------------------------------------------------------

/// Low-level Docker registry HTTP client using anonymous bearer tokens.
pub struct RegistryClient {
    client: reqwest::Client,
    config: RegistryConfig,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// A manifest endpoint response together with the digest the registry
/// reported for it (empty when the header was absent).
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    pub document: ManifestDocument,
    pub digest: String,
}

/// A single-platform manifest reached from a tag, possibly via an index.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    pub manifest: ImageManifest,
    /// Digest used for reporting only; never checked against content.
    pub digest: String,
    /// Media type of the first document fetched for the tag.
    pub source_media_type: String,
    /// Set when the tag pointed at an index.
    pub resolved_platform: Option<Platform>,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pullbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -- public API ---------------------------------------------------------

    /// Fetch an anonymous pull token for `repository`.
    ///
    /// The token is reused for every later request of the session; expiry is
    /// not tracked.
    pub async fn fetch_token(&self, repository: &str) -> Result<SecretString> {
        let token_url = format!(
            "{}?service={}&scope=repository:{}:pull",
            self.config.auth_url, self.config.service, repository,
        );
        debug!(%token_url, "fetching bearer token");

        let resp = self
            .client
            .get(&token_url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| RegistryError::Auth(format!("GET {}: {}", token_url, e)))?;

        if !resp.status().is_success() {
            return Err(RegistryError::Auth(describe_failure(&token_url, resp).await));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| RegistryError::Auth(format!("malformed token response: {}", e)))?;

        Ok(SecretString::from(body.token))
    }

    /// Fetch the manifest or index stored under `reference` (a tag or a
    /// digest).
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &SecretString,
    ) -> Result<FetchedManifest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.config.registry_url, repository, reference,
        );

        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, MANIFEST_ACCEPT.join(", "))
            .bearer_auth(token.expose_secret())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| RegistryError::Manifest(format!("GET {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(RegistryError::Manifest(describe_failure(&url, resp).await));
        }

        let digest = resp
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = resp
            .bytes()
            .await
            .map_err(|e| RegistryError::Manifest(format!("GET {}: {}", url, e)))?;

        let document = ManifestDocument::from_slice(&body)?;
        debug!(%url, media_type = document.media_type(), %digest, "fetched manifest");

        Ok(FetchedManifest { document, digest })
    }

    /// Resolve `reference` to a single-platform manifest. When the registry
    /// returns an index, the first entry matching `platform` is fetched by
    /// digest and its digest replaces the reported one.
    pub async fn resolve_manifest(
        &self,
        repository: &str,
        reference: &str,
        token: &SecretString,
        platform: &Platform,
    ) -> Result<ResolvedManifest> {
        let fetched = self.fetch_manifest(repository, reference, token).await?;
        let source_media_type = fetched.document.media_type().to_string();
        info!(media_type = %source_media_type, "fetched manifest");

        let idx = match fetched.document {
            ManifestDocument::Image(manifest) => {
                return Ok(ResolvedManifest {
                    manifest,
                    digest: fetched.digest,
                    source_media_type,
                    resolved_platform: None,
                });
            }
            ManifestDocument::Index(idx) => idx,
        };

        info!(
            entries = idx.manifests.len(),
            "multi-arch index detected, resolving platform {}", platform,
        );
        let desc = idx.select_platform(platform)?;
        info!(digest = %desc.digest, "fetching platform manifest");

        let platform_manifest = self.fetch_manifest(repository, &desc.digest, token).await?;
        match platform_manifest.document {
            ManifestDocument::Image(manifest) => Ok(ResolvedManifest {
                manifest,
                digest: desc.digest.clone(),
                source_media_type,
                resolved_platform: desc.platform.clone(),
            }),
            ManifestDocument::Index(_) => Err(RegistryError::Manifest(format!(
                "{} resolved to another index, expected an image manifest",
                desc.digest
            ))),
        }
    }

    /// Open a streaming download of the blob `digest`.
    ///
    /// `idle_timeout` bounds the wait for the response headers and, later,
    /// for each body chunk. A body that keeps arriving is never cut off.
    pub async fn fetch_blob(
        &self,
        repository: &str,
        digest: &str,
        token: &SecretString,
        idle_timeout: Option<Duration>,
    ) -> Result<BlobStream> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.config.registry_url, repository, digest,
        );

        let send = self.client.get(&url).bearer_auth(token.expose_secret()).send();
        let sent = match idle_timeout {
            Some(t) => tokio::time::timeout(t, send).await.map_err(|_| {
                RegistryError::BlobDownload {
                    digest: digest.to_string(),
                    reason: format!("GET {}: no response within {:?}", url, t),
                }
            })?,
            None => send.await,
        };
        let resp = sent.map_err(|e| RegistryError::BlobDownload {
            digest: digest.to_string(),
            reason: format!("GET {}: {}", url, e),
        })?;

        if !resp.status().is_success() {
            return Err(RegistryError::BlobDownload {
                digest: digest.to_string(),
                reason: describe_failure(&url, resp).await,
            });
        }

        Ok(BlobStream {
            digest: digest.to_string(),
            response: resp,
            idle_timeout,
        })
    }

    /// Download the blob `digest` into `dest`, calling `on_progress` with the
    /// size of every chunk written. Returns the number of bytes written.
    ///
    /// The file is created (or truncated) before the first byte arrives and
    /// is left in place if the transfer fails.
    pub async fn fetch_blob_to_file(
        &self,
        repository: &str,
        digest: &str,
        token: &SecretString,
        dest: &Path,
        idle_timeout: Option<Duration>,
        on_progress: impl FnMut(u64),
    ) -> Result<u64> {
        let blob = self.fetch_blob(repository, digest, token, idle_timeout).await?;

        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| blob.failure(format!("create {}: {}", dest.display(), e)))?;
        let mut out = BufWriter::with_capacity(BLOB_CHUNK_SIZE, file);

        let written = blob.write_to(&mut out, on_progress).await?;
        debug!(digest, bytes = written, path = %dest.display(), "stored blob");
        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// BlobStream
// ---------------------------------------------------------------------------

/// An open blob response whose body has not been read yet.
pub struct BlobStream {
    digest: String,
    response: reqwest::Response,
    idle_timeout: Option<Duration>,
}

impl BlobStream {
    /// Copy the body into `out` chunk by chunk.
    ///
    /// If the body breaks off or stalls past the idle timeout, whatever was
    /// already received is flushed to `out` before the error is returned.
    pub async fn write_to<W>(mut self, out: &mut W, mut on_chunk: impl FnMut(u64)) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written: u64 = 0;
        loop {
            let next = match self.idle_timeout {
                Some(t) => match tokio::time::timeout(t, self.response.chunk()).await {
                    Ok(next) => next.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("no data for {:?}", t)),
                },
                None => self.response.chunk().await.map_err(|e| e.to_string()),
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(cause) => {
                    if let Err(e) = out.flush().await {
                        debug!(digest = %self.digest, error = %e, "flushing partial blob failed");
                    }
                    return Err(self.failure(format!(
                        "stream interrupted after {} bytes: {}",
                        written, cause
                    )));
                }
            };

            out.write_all(&chunk)
                .await
                .map_err(|e| self.failure(format!("write failed: {}", e)))?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        out.flush()
            .await
            .map_err(|e| self.failure(format!("flush failed: {}", e)))?;
        Ok(written)
    }

    fn failure(&self, reason: String) -> RegistryError {
        RegistryError::BlobDownload {
            digest: self.digest.clone(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn describe_failure(url: &str, resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!("GET {} returned {}: {}", url, status, body.trim())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
