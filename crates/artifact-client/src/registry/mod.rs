use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use floe_compiler::CompiledArtifacts;

use crate::annotations::SignatureMetadata;
use crate::errors::{RegistryError, RegistryResult};

pub mod config;
mod directory;
mod oci;

pub use directory::DirectoryBackend;
pub use oci::OciBackend;

pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.floe.compiled-artifacts.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.floe.compiled-artifacts.layer.v1+json";

/// Bounded worker pool size for tag enumeration and layer fetches.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Network retry budget: three attempts total, exponential backoff between
/// them. 4xx responses are terminal and never retried.
const MAX_ATTEMPTS: usize = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(300);

/// One manifest as the lifecycle engine sees it: layer descriptors plus the
/// annotation map. Config content is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactManifest {
    pub layers: Vec<BlobDescriptor>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobDescriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

/// Listed artifact revision, sorted by `(repository, tag)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Descriptor {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl Descriptor {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

/// Transport seam. Production talks to OCI registries; tests and air-gapped
/// flows use the directory-backed implementation.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Upload config + content layer + manifest; returns the manifest digest.
    async fn push(
        &self,
        reference: &str,
        content: &[u8],
        annotations: &BTreeMap<String, String>,
    ) -> RegistryResult<String>;

    async fn fetch_manifest(&self, reference: &str)
        -> RegistryResult<(ArtifactManifest, String)>;

    async fn fetch_blob(&self, reference: &str, digest: &str) -> RegistryResult<Vec<u8>>;

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>>;

    async fn delete(&self, reference: &str) -> RegistryResult<()>;
}

/// Split `repo[:tag]` (optionally `oci://`-prefixed, optionally `@digest`).
pub(crate) fn split_reference(reference: &str) -> RegistryResult<(String, String)> {
    let stripped = reference.strip_prefix("oci://").unwrap_or(reference);
    if stripped.is_empty() {
        return Err(RegistryError::InvalidReference(reference.to_string()));
    }
    if let Some((repository, digest)) = stripped.split_once('@') {
        return Ok((repository.to_string(), format!("@{digest}")));
    }
    let tag_separator = stripped
        .rfind(':')
        .filter(|index| *index > stripped.rfind('/').unwrap_or(0));
    match tag_separator {
        Some(index) => Ok((
            stripped[..index].to_string(),
            stripped[index + 1..].to_string(),
        )),
        None => Ok((stripped.to_string(), "latest".to_string())),
    }
}

/// Artifact lifecycle against a registry backend: push, pull, list, delete
/// and signature-annotation access, with bounded-concurrency fan-out and a
/// bounded retry budget.
///
/// Cancellation follows the future: dropping an in-flight operation aborts
/// the underlying requests and leaves nothing visible to the caller.
pub struct Registry {
    backend: Arc<dyn RegistryBackend>,
    concurrency: usize,
}

impl Registry {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Registry {
            backend,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn with_retries<T, F, Fut>(&self, operation: F) -> RegistryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = RegistryResult<T>>,
    {
        operation
            .retry(
                ExponentialBuilder::default().with_max_times(MAX_ATTEMPTS - 1),
            )
            .when(RegistryError::is_retryable)
            .await
    }

    async fn timed<T>(
        &self,
        reference: &str,
        budget: Duration,
        operation: impl std::future::Future<Output = RegistryResult<T>>,
    ) -> RegistryResult<T> {
        tokio::time::timeout(budget, operation)
            .await
            .map_err(|_| RegistryError::Timeout {
                reference: reference.to_string(),
                seconds: budget.as_secs(),
            })?
    }

    /// Serialize and upload; the returned descriptor carries the immutable
    /// manifest digest assigned by the registry.
    pub async fn push(
        &self,
        reference: &str,
        artifacts: &CompiledArtifacts,
        annotations: BTreeMap<String, String>,
    ) -> RegistryResult<Descriptor> {
        let (repository, tag) = split_reference(reference)?;
        let content = artifacts
            .to_canonical_json()
            .map_err(|e| RegistryError::Malformed {
                reference: reference.to_string(),
                reason: format!("cannot serialize artifact: {e}"),
            })?;
        let digest = self
            .timed(
                reference,
                PUSH_TIMEOUT,
                self.with_retries(|| {
                    let content = content.clone();
                    let annotations = annotations.clone();
                    async move { self.backend.push(reference, &content, &annotations).await }
                }),
            )
            .await?;
        debug!(reference, digest = digest.as_str(), "artifact pushed");
        Ok(Descriptor {
            repository,
            tag,
            digest,
        })
    }

    /// Fetch manifest and annotations without touching layer content.
    pub async fn manifest(
        &self,
        reference: &str,
    ) -> RegistryResult<(ArtifactManifest, String)> {
        self.timed(
            reference,
            REQUEST_TIMEOUT,
            self.with_retries(|| async { self.backend.fetch_manifest(reference).await }),
        )
        .await
    }

    /// Download and deserialize the artifact content. Layers are fetched
    /// through the bounded worker pool and joined before deserialization.
    pub async fn pull_content(
        &self,
        reference: &str,
        manifest: &ArtifactManifest,
    ) -> RegistryResult<CompiledArtifacts> {
        let layers: Vec<&BlobDescriptor> = manifest
            .layers
            .iter()
            .filter(|layer| layer.media_type == LAYER_MEDIA_TYPE)
            .collect();
        if layers.is_empty() {
            return Err(RegistryError::MissingLayer {
                reference: reference.to_string(),
            });
        }

        let chunks: Vec<Vec<u8>> = stream::iter(layers)
            .map(|layer| {
                let digest = layer.digest.clone();
                async move {
                    self.with_retries(|| {
                        let digest = digest.clone();
                        async move { self.backend.fetch_blob(reference, &digest).await }
                    })
                    .await
                }
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let content: Vec<u8> = chunks.concat();
        let artifacts =
            CompiledArtifacts::from_slice(&content).map_err(RegistryError::Schema)?;
        Ok(artifacts)
    }

    /// Raw bytes of the first layer, whatever its media type. Parent
    /// platform manifests are stored this way; they are YAML documents, not
    /// CompiledArtifacts.
    pub async fn pull_layer_bytes(&self, reference: &str) -> RegistryResult<Vec<u8>> {
        let (manifest, _) = self.manifest(reference).await?;
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| RegistryError::MissingLayer {
                reference: reference.to_string(),
            })?;
        let digest = layer.digest.clone();
        self.with_retries(|| {
            let digest = digest.clone();
            async move { self.backend.fetch_blob(reference, &digest).await }
        })
        .await
    }

    /// The digest the signature covers: the compiled-artifacts layer digest,
    /// which is stable across annotation updates.
    pub fn content_digest(manifest: &ArtifactManifest) -> Option<String> {
        manifest
            .layers
            .iter()
            .find(|layer| layer.media_type == LAYER_MEDIA_TYPE)
            .map(|layer| layer.digest.clone())
    }

    /// Enumerate tagged revisions with the bounded worker pool. Never walks
    /// tags sequentially; the returned list is sorted by `(repository, tag)`
    /// and truncated to `limit` after sorting.
    pub async fn list(
        &self,
        repository: &str,
        limit: Option<usize>,
    ) -> RegistryResult<Vec<Descriptor>> {
        let tags = self
            .timed(
                repository,
                REQUEST_TIMEOUT,
                self.with_retries(|| async { self.backend.list_tags(repository).await }),
            )
            .await?;

        let mut descriptors: Vec<Descriptor> = stream::iter(tags)
            .map(|tag| {
                let reference = format!("{repository}:{tag}");
                async move {
                    let result = self
                        .with_retries(|| async { self.backend.fetch_manifest(&reference).await })
                        .await;
                    (tag, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|(tag, result)| async move {
                match result {
                    Ok((_, digest)) => Some(Descriptor {
                        repository: repository.to_string(),
                        tag,
                        digest,
                    }),
                    Err(error) => {
                        warn!(tag, %error, "skipping tag that cannot be resolved");
                        None
                    }
                }
            })
            .collect()
            .await;

        descriptors.sort();
        if let Some(limit) = limit {
            descriptors.truncate(limit);
        }
        Ok(descriptors)
    }

    /// Best-effort removal; registry errors are surfaced verbatim.
    pub async fn delete(&self, reference: &str) -> RegistryResult<()> {
        self.timed(
            reference,
            REQUEST_TIMEOUT,
            self.backend.delete(reference),
        )
        .await
    }

    pub async fn signature_metadata(
        &self,
        reference: &str,
    ) -> RegistryResult<Option<SignatureMetadata>> {
        let (manifest, _) = self.manifest(reference).await?;
        SignatureMetadata::from_annotations(&manifest.annotations).map_err(|e| {
            RegistryError::Malformed {
                reference: reference.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Re-upload the manifest with signature annotations merged in. The tag
    /// moves to the new manifest; the content layer digest is unchanged.
    pub async fn attach_signature(
        &self,
        reference: &str,
        metadata: &SignatureMetadata,
    ) -> RegistryResult<Descriptor> {
        let (manifest, _) = self.manifest(reference).await?;
        let artifacts = self.pull_content(reference, &manifest).await?;
        let mut annotations = manifest.annotations;
        annotations.extend(metadata.to_annotations());
        self.push(reference, &artifacts, annotations).await
    }
}
