use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use oci_distribution::client::{
    Certificate as OciCertificate, CertificateEncoding, Client, ClientConfig, ClientProtocol,
    Config, ImageLayer,
};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use tracing::debug;

use crate::errors::{RegistryError, RegistryResult};
use crate::registry::config::{DockerConfig, RegistryCredentials};
use crate::registry::{
    ArtifactManifest, BlobDescriptor, RegistryBackend, CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE,
};
use crate::sources::Sources;

/// Production backend over the OCI distribution protocol.
pub struct OciBackend {
    docker_config: Option<DockerConfig>,
    sources: Sources,
}

impl OciBackend {
    pub fn new(docker_config: Option<DockerConfig>, sources: Option<Sources>) -> Self {
        OciBackend {
            docker_config,
            sources: sources.unwrap_or_default(),
        }
    }

    fn reference(&self, reference: &str) -> RegistryResult<Reference> {
        let stripped = reference.strip_prefix("oci://").unwrap_or(reference);
        Reference::from_str(stripped)
            .map_err(|_| RegistryError::InvalidReference(reference.to_string()))
    }

    fn client(&self, reference: &Reference) -> Client {
        let registry = reference.registry();
        let protocol = if self.sources.is_insecure_source(registry) {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        let extra_root_certificates = self
            .sources
            .source_authority_pem(registry)
            .map(|pem| {
                vec![OciCertificate {
                    encoding: CertificateEncoding::Pem,
                    data: pem,
                }]
            })
            .unwrap_or_default();
        Client::new(ClientConfig {
            protocol,
            extra_root_certificates,
            ..Default::default()
        })
    }

    fn auth(&self, reference: &Reference) -> RegistryAuth {
        self.docker_config
            .as_ref()
            .and_then(|config| config.credentials_for(reference.registry()))
            .map(|RegistryCredentials::BasicAuth(user, password)| {
                RegistryAuth::Basic(user, password)
            })
            .unwrap_or(RegistryAuth::Anonymous)
    }

    fn map_error(reference: &str, error: OciDistributionError) -> RegistryError {
        match error {
            OciDistributionError::ServerError { code, message, .. } => RegistryError::Server {
                status: code,
                reference: reference.to_string(),
                message,
            },
            other => RegistryError::Network {
                reference: reference.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl RegistryBackend for OciBackend {
    async fn push(
        &self,
        reference: &str,
        content: &[u8],
        annotations: &BTreeMap<String, String>,
    ) -> RegistryResult<String> {
        let oci_reference = self.reference(reference)?;
        let auth = self.auth(&oci_reference);
        let mut client = self.client(&oci_reference);

        let layers = vec![ImageLayer::new(
            content.to_vec(),
            LAYER_MEDIA_TYPE.to_string(),
            None,
        )];
        let config = Config::new(b"{}".to_vec(), CONFIG_MEDIA_TYPE.to_string(), None);
        let manifest = OciImageManifest::build(
            &layers,
            &config,
            Some(annotations.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );

        client
            .push(&oci_reference, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| Self::map_error(reference, e))?;
        debug!(reference, "manifest and layers uploaded");

        client
            .fetch_manifest_digest(&oci_reference, &auth)
            .await
            .map_err(|e| Self::map_error(reference, e))
    }

    async fn fetch_manifest(
        &self,
        reference: &str,
    ) -> RegistryResult<(ArtifactManifest, String)> {
        let oci_reference = self.reference(reference)?;
        let auth = self.auth(&oci_reference);
        let (manifest, digest) = self
            .client(&oci_reference)
            .pull_manifest(&oci_reference, &auth)
            .await
            .map_err(|e| Self::map_error(reference, e))?;

        let manifest = match manifest {
            OciManifest::Image(image) => image,
            OciManifest::ImageIndex(_) => {
                return Err(RegistryError::Malformed {
                    reference: reference.to_string(),
                    reason: "expected an image manifest, found an index".to_string(),
                })
            }
        };
        let layers = manifest
            .layers
            .iter()
            .map(|descriptor| BlobDescriptor {
                media_type: descriptor.media_type.clone(),
                digest: descriptor.digest.clone(),
                size: descriptor.size as u64,
            })
            .collect();
        let annotations = manifest
            .annotations
            .map(|annotations| annotations.into_iter().collect())
            .unwrap_or_default();
        Ok((
            ArtifactManifest {
                layers,
                annotations,
            },
            digest,
        ))
    }

    async fn fetch_blob(&self, reference: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        let oci_reference = self.reference(reference)?;
        let mut content = Vec::new();
        self.client(&oci_reference)
            .pull_blob(&oci_reference, digest, &mut content)
            .await
            .map_err(|e| Self::map_error(reference, e))?;
        Ok(content)
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        let oci_reference = self.reference(repository)?;
        let auth = self.auth(&oci_reference);
        let response = self
            .client(&oci_reference)
            .list_tags(&oci_reference, &auth, None, None)
            .await
            .map_err(|e| Self::map_error(repository, e))?;
        Ok(response.tags)
    }

    /// DELETE against the distribution API directly; `oci-distribution`
    /// exposes no removal call.
    async fn delete(&self, reference: &str) -> RegistryResult<()> {
        let oci_reference = self.reference(reference)?;
        let registry = oci_reference.registry();
        let scheme = if self.sources.is_insecure_source(registry) {
            "http"
        } else {
            "https"
        };
        let selector = oci_reference
            .digest()
            .map(str::to_string)
            .unwrap_or_else(|| oci_reference.tag().unwrap_or("latest").to_string());
        let url = format!(
            "{scheme}://{registry}/v2/{}/manifests/{selector}",
            oci_reference.repository()
        );

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RegistryError::Network {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;
        let mut request = http.delete(&url);
        if let RegistryAuth::Basic(user, password) = self.auth(&oci_reference) {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await.map_err(|e| RegistryError::Network {
            reference: reference.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RegistryError::Server {
                status: status.as_u16(),
                reference: reference.to_string(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}
