use floe_compiler::CompiledArtifacts;

use crate::annotations::SignatureMetadata;
use crate::errors::{RegistryError, VerifyResult};
use crate::registry::Registry;
use crate::verify::{VerificationPolicy, VerificationResult, Verifier};

/// A pulled artifact always carries its verification outcome; callers never
/// see bytes that were rejected under `enforce`.
#[derive(Debug)]
pub struct PulledArtifact {
    pub artifacts: CompiledArtifacts,
    pub digest: String,
    pub verification: VerificationResult,
}

/// Lifecycle façade: registry transport plus the verification gate.
pub struct ArtifactClient {
    registry: Registry,
    verifier: Verifier,
}

impl ArtifactClient {
    pub fn new(registry: Registry, verifier: Verifier) -> Self {
        ArtifactClient { registry, verifier }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Pull with the policy applied before any content reaches the caller.
    ///
    /// The signature covers the content-layer digest, so verification runs
    /// against the manifest alone; under `enforce` a failing artifact's
    /// layers are never even fetched.
    pub async fn pull(
        &self,
        reference: &str,
        policy: &VerificationPolicy,
        environment: Option<&str>,
    ) -> VerifyResult<PulledArtifact> {
        let (manifest, _manifest_digest) = self.registry.manifest(reference).await?;
        let content_digest =
            Registry::content_digest(&manifest).ok_or(RegistryError::MissingLayer {
                reference: reference.to_string(),
            })?;
        let metadata =
            SignatureMetadata::from_annotations(&manifest.annotations)?;

        let verification = self
            .verifier
            .verify(
                reference,
                &content_digest,
                metadata.as_ref(),
                &manifest.annotations,
                policy,
                environment,
            )
            .await?;

        let artifacts = self.registry.pull_content(reference, &manifest).await?;
        Ok(PulledArtifact {
            artifacts,
            digest: content_digest,
            verification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::registry::DirectoryBackend;
    use crate::sign::fakes;
    use crate::verify::{EnforcementMode, SignatureStatus};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn sample_artifacts() -> CompiledArtifacts {
        let yaml = r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
plugins:
  compute:
    type: duckdb
transforms:
  - name: staging
"#;
        let floe_compiler::Document::DataProduct(product) =
            floe_compiler::parse_document(yaml.as_bytes()).unwrap()
        else {
            panic!("fixture must be a DataProduct");
        };
        let doc = floe_compiler::Document::DataProduct(product.clone());
        let resolved =
            futures::executor::block_on(floe_compiler::resolve(&doc, &Unreachable)).unwrap();
        floe_compiler::compile(
            &resolved,
            &product,
            floe_compiler::Identity {
                product_id: "orders".to_string(),
            },
            chrono::DateTime::parse_from_rfc3339("2026-03-14T09:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            floe_compiler::plugin_registry(),
        )
        .unwrap()
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl floe_compiler::ParentLoader for Unreachable {
        async fn load(
            &self,
            reference: &str,
        ) -> Result<floe_compiler::Manifest, floe_compiler::ParentLoadError> {
            Err(floe_compiler::ParentLoadError::new(format!(
                "unexpected parent {reference}"
            )))
        }
    }

    fn client(dir: &std::path::Path) -> ArtifactClient {
        let registry = Registry::new(Arc::new(DirectoryBackend::new(dir)));
        let verifier = Verifier::new(
            Some(Arc::new(fakes::FakeRekor::default())),
            Arc::new(AuditSink::new()),
        );
        ArtifactClient::new(registry, verifier)
    }

    fn policy(enforcement: EnforcementMode) -> VerificationPolicy {
        VerificationPolicy {
            enabled: true,
            enforcement,
            ..Default::default()
        }
    }

    const REFERENCE: &str = "registry.test/floe/orders:0.1.0";

    #[tokio::test]
    async fn unsigned_pull_under_enforce_returns_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        client
            .registry()
            .push(REFERENCE, &sample_artifacts(), BTreeMap::new())
            .await
            .unwrap();

        let err = client
            .pull(REFERENCE, &policy(EnforcementMode::Enforce), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::errors::VerifyError::SignatureVerification { .. }
        ));
        let events = client.verifier().audit().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature_status, SignatureStatus::Unsigned);
    }

    #[tokio::test]
    async fn unsigned_pull_under_warn_returns_artifact_with_status() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let artifacts = sample_artifacts();
        client
            .registry()
            .push(REFERENCE, &artifacts, BTreeMap::new())
            .await
            .unwrap();

        let pulled = client
            .pull(REFERENCE, &policy(EnforcementMode::Warn), None)
            .await
            .unwrap();
        assert_eq!(pulled.artifacts, artifacts);
        assert_eq!(pulled.verification.status, SignatureStatus::Unsigned);
        assert_eq!(client.verifier().audit().snapshot().len(), 1);
    }

    #[tokio::test]
    async fn signed_pull_under_enforce_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let artifacts = sample_artifacts();
        client
            .registry()
            .push(REFERENCE, &artifacts, BTreeMap::new())
            .await
            .unwrap();

        let digest = artifacts.digest().unwrap();
        let metadata = fakes::engine().sign_keyless(&digest).await.unwrap();
        client
            .registry()
            .attach_signature(REFERENCE, &metadata)
            .await
            .unwrap();

        let pulled = client
            .pull(REFERENCE, &policy(EnforcementMode::Enforce), None)
            .await
            .unwrap();
        assert_eq!(pulled.verification.status, SignatureStatus::Valid);
        assert_eq!(pulled.digest, digest);
    }

    #[tokio::test]
    async fn signature_survives_annotation_re_push() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());
        let artifacts = sample_artifacts();
        client
            .registry()
            .push(REFERENCE, &artifacts, BTreeMap::new())
            .await
            .unwrap();
        let digest = artifacts.digest().unwrap();
        let metadata = fakes::engine().sign_keyless(&digest).await.unwrap();
        client
            .registry()
            .attach_signature(REFERENCE, &metadata)
            .await
            .unwrap();

        let stored = client
            .registry()
            .signature_metadata(REFERENCE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, metadata);
    }
}
