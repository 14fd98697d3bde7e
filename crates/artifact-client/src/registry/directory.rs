use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{RegistryError, RegistryResult};
use crate::registry::{
    split_reference, ArtifactManifest, BlobDescriptor, RegistryBackend, LAYER_MEDIA_TYPE,
};

/// Filesystem-backed registry: the same manifest/blob shapes as the OCI
/// protocol, stored under a directory. Serves integration tests and
/// air-gapped exports without a registry process.
pub struct DirectoryBackend {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct StoredManifest {
    layers: Vec<StoredLayer>,
    annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct StoredLayer {
    media_type: String,
    digest: String,
    size: u64,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryBackend { root: root.into() }
    }

    fn repository_dir(&self, repository: &str) -> PathBuf {
        // flatten the repository path so a repo component can never escape
        // the root
        self.root.join(repository.replace('/', "_"))
    }

    fn tag_path(&self, repository: &str, tag: &str) -> PathBuf {
        self.repository_dir(repository)
            .join("tags")
            .join(format!("{tag}.json"))
    }

    fn blob_path(&self, repository: &str, digest: &str) -> PathBuf {
        self.repository_dir(repository)
            .join("blobs")
            .join(digest.replace(':', "_"))
    }

    fn resolve(&self, reference: &str) -> RegistryResult<(String, PathBuf)> {
        let (repository, selector) = split_reference(reference)?;
        let path = if let Some(digest) = selector.strip_prefix('@') {
            // digest-addressed: scan tags for the matching manifest
            let tags_dir = self.repository_dir(&repository).join("tags");
            let mut found = None;
            if let Ok(entries) = std::fs::read_dir(&tags_dir) {
                for entry in entries.flatten() {
                    let bytes = std::fs::read(entry.path())?;
                    if manifest_digest(&bytes) == digest {
                        found = Some(entry.path());
                        break;
                    }
                }
            }
            found.ok_or_else(|| RegistryError::Server {
                status: 404,
                reference: reference.to_string(),
                message: "manifest not found".to_string(),
            })?
        } else {
            self.tag_path(&repository, &selector)
        };
        Ok((repository, path))
    }
}

fn manifest_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[async_trait]
impl RegistryBackend for DirectoryBackend {
    async fn push(
        &self,
        reference: &str,
        content: &[u8],
        annotations: &BTreeMap<String, String>,
    ) -> RegistryResult<String> {
        let (repository, tag) = split_reference(reference)?;
        let content_digest = manifest_digest(content);

        let blob_path = self.blob_path(&repository, &content_digest);
        std::fs::create_dir_all(blob_path.parent().expect("blob path has a parent"))?;
        std::fs::write(&blob_path, content)?;

        let manifest = StoredManifest {
            layers: vec![StoredLayer {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                digest: content_digest,
                size: content.len() as u64,
            }],
            annotations: annotations.clone(),
        };
        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).map_err(|e| RegistryError::Malformed {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        let tag_path = self.tag_path(&repository, &tag);
        std::fs::create_dir_all(tag_path.parent().expect("tag path has a parent"))?;
        std::fs::write(&tag_path, &manifest_bytes)?;
        Ok(manifest_digest(&manifest_bytes))
    }

    async fn fetch_manifest(
        &self,
        reference: &str,
    ) -> RegistryResult<(ArtifactManifest, String)> {
        let (_, path) = self.resolve(reference)?;
        let bytes = std::fs::read(&path).map_err(|_| RegistryError::Server {
            status: 404,
            reference: reference.to_string(),
            message: "manifest not found".to_string(),
        })?;
        let stored: StoredManifest =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Malformed {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?;
        Ok((
            ArtifactManifest {
                layers: stored
                    .layers
                    .into_iter()
                    .map(|layer| BlobDescriptor {
                        media_type: layer.media_type,
                        digest: layer.digest,
                        size: layer.size,
                    })
                    .collect(),
                annotations: stored.annotations,
            },
            manifest_digest(&bytes),
        ))
    }

    async fn fetch_blob(&self, reference: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        let (repository, _) = split_reference(reference)?;
        std::fs::read(self.blob_path(&repository, digest)).map_err(|_| RegistryError::Server {
            status: 404,
            reference: reference.to_string(),
            message: format!("blob {digest} not found"),
        })
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        let (repository, _) = split_reference(repository)?;
        let tags_dir = self.repository_dir(&repository).join("tags");
        let mut tags = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&tags_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry
                    .path()
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                {
                    tags.push(name.to_string());
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    async fn delete(&self, reference: &str) -> RegistryResult<()> {
        let (_, path) = self.resolve(reference)?;
        std::fs::remove_file(path).map_err(RegistryError::Io)
    }
}
