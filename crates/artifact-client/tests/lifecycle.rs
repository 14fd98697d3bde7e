use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use artifact_client::errors::{RegistryResult, SigningResult, VerifyError};
use artifact_client::{
    export_bundle, ArtifactClient, ArtifactManifest, AuditSink, CertificateMetadata,
    DirectoryBackend, EnforcementMode, FulcioApi, IdentityToken, OidcProvider, Registry,
    RegistryBackend, RekorApi, RekorEntry, SignatureStatus, SigningEngine, VerificationPolicy,
    Verifier,
};
use floe_compiler::{
    compile, parse_document, plugin_registry, resolve, CompiledArtifacts, Document, Identity,
    Manifest, ParentLoadError, ParentLoader,
};

struct NoParents;

#[async_trait]
impl ParentLoader for NoParents {
    async fn load(&self, reference: &str) -> Result<Manifest, ParentLoadError> {
        Err(ParentLoadError::new(format!("unexpected parent {reference}")))
    }
}

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
    let Document::DataProduct(product) = parse_document(yaml.as_bytes()).unwrap() else {
        panic!("fixture must be a DataProduct");
    };
    let doc = Document::DataProduct(product.clone());
    let resolved = futures::executor::block_on(resolve(&doc, &NoParents)).unwrap();
    compile(
        &resolved,
        &product,
        Identity {
            product_id: "orders".to_string(),
        },
        chrono::DateTime::parse_from_rfc3339("2026-03-14T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
        plugin_registry(),
    )
    .unwrap()
}

struct TestOidc;

#[async_trait]
impl OidcProvider for TestOidc {
    async fn acquire_token(&self) -> SigningResult<IdentityToken> {
        Ok(IdentityToken {
            token: "header.payload.sig".to_string(),
            issuer: "https://oidc.integration.test".to_string(),
            subject: "ci@acme.dev".to_string(),
        })
    }
}

struct TestFulcio;

#[async_trait]
impl FulcioApi for TestFulcio {
    async fn issue_certificate(
        &self,
        token: &IdentityToken,
        _public_key_b64: &str,
    ) -> SigningResult<CertificateMetadata> {
        let pem = "-----BEGIN CERTIFICATE-----\ndGVzdA==\n-----END CERTIFICATE-----\n";
        let now = Utc::now();
        Ok(CertificateMetadata {
            issuer: Some(token.issuer.clone()),
            subject: token.subject.clone(),
            not_before: now,
            not_after: now + Duration::minutes(10),
            fingerprint: CertificateMetadata::fingerprint_of(pem),
            pem: pem.to_string(),
        })
    }
}

#[derive(Default)]
struct TestRekor;

#[async_trait]
impl RekorApi for TestRekor {
    async fn append(
        &self,
        digest: &str,
        _signature_b64: &str,
        _public_key_b64: &str,
    ) -> SigningResult<RekorEntry> {
        Ok(RekorEntry {
            log_index: 7,
            uuid: format!("uuid-{digest}"),
            integrated_time: Utc::now(),
        })
    }

    async fn verify_inclusion(&self, entry: &RekorEntry, digest: &str) -> SigningResult<bool> {
        Ok(entry.uuid == format!("uuid-{digest}"))
    }
}

fn signing_engine() -> SigningEngine {
    SigningEngine::new(Arc::new(TestOidc), Arc::new(TestFulcio), Arc::new(TestRekor))
}

fn client(dir: &std::path::Path, audit: Arc<AuditSink>) -> ArtifactClient {
    let registry = Registry::new(Arc::new(DirectoryBackend::new(dir)));
    let verifier = Verifier::new(Some(Arc::new(TestRekor)), audit);
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
async fn enforce_pull_of_unsigned_artifact_fails_with_audit_event() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditSink::new());
    let client = client(dir.path(), audit.clone());
    client
        .registry()
        .push(REFERENCE, &sample_artifacts(), BTreeMap::new())
        .await
        .unwrap();

    let err = client
        .pull(REFERENCE, &policy(EnforcementMode::Enforce), None)
        .await
        .unwrap_err();
    assert!(matches!(err, VerifyError::SignatureVerification { .. }));

    let events = audit.snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signature_status, SignatureStatus::Unsigned);
    assert_eq!(events[0].enforcement, EnforcementMode::Enforce);
}

#[tokio::test]
async fn warn_pull_of_unsigned_artifact_returns_artifact_and_audits() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditSink::new());
    let client = client(dir.path(), audit.clone());
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
    assert_eq!(audit.snapshot().len(), 1);
}

#[tokio::test]
async fn sign_then_pull_with_rekor_requirement_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditSink::new());
    let client = client(dir.path(), audit.clone());
    let artifacts = sample_artifacts();
    client
        .registry()
        .push(REFERENCE, &artifacts, BTreeMap::new())
        .await
        .unwrap();

    let digest = artifacts.digest().unwrap();
    let metadata = signing_engine().sign_keyless(&digest).await.unwrap();
    client
        .registry()
        .attach_signature(REFERENCE, &metadata)
        .await
        .unwrap();

    let mut policy = policy(EnforcementMode::Enforce);
    policy.require_rekor = true;
    let pulled = client.pull(REFERENCE, &policy, None).await.unwrap();
    assert_eq!(pulled.verification.status, SignatureStatus::Valid);
    assert_eq!(pulled.digest, digest);
}

#[tokio::test]
async fn offline_bundle_export_and_verification() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditSink::new());
    let client = client(dir.path(), audit.clone());
    let artifacts = sample_artifacts();
    client
        .registry()
        .push(REFERENCE, &artifacts, BTreeMap::new())
        .await
        .unwrap();
    let digest = artifacts.digest().unwrap();
    let metadata = signing_engine().sign_keyless(&digest).await.unwrap();
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
    let bundle = export_bundle(&digest, &stored).unwrap();

    // the air-gapped side: no rekor client at all
    let offline_verifier = Verifier::new(None, Arc::new(AuditSink::new()));
    let mut policy = policy(EnforcementMode::Enforce);
    policy.require_rekor = true;
    let result = offline_verifier
        .verify_with_bundle(&bundle, &policy, None)
        .await
        .unwrap();
    assert_eq!(result.status, SignatureStatus::Valid);
}

#[tokio::test]
async fn environment_override_drives_pull_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditSink::new());
    let client = client(dir.path(), audit.clone());
    client
        .registry()
        .push(REFERENCE, &sample_artifacts(), BTreeMap::new())
        .await
        .unwrap();

    let mut policy = policy(EnforcementMode::Warn);
    policy.environments.insert(
        "production".to_string(),
        artifact_client::EnvironmentPolicy {
            enforcement: EnforcementMode::Enforce,
        },
    );

    assert!(client
        .pull(REFERENCE, &policy, Some("staging"))
        .await
        .is_ok());
    assert!(client
        .pull(REFERENCE, &policy, Some("production"))
        .await
        .is_err());
}

/// Tag enumeration goes through a bounded pool: with many tags the backend
/// must see parallel manifest fetches, never more than the configured bound.
struct ConcurrencyProbe {
    inner: DirectoryBackend,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn new(inner: DirectoryBackend) -> Self {
        ConcurrencyProbe {
            inner,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RegistryBackend for ConcurrencyProbe {
    async fn push(
        &self,
        reference: &str,
        content: &[u8],
        annotations: &BTreeMap<String, String>,
    ) -> RegistryResult<String> {
        self.inner.push(reference, content, annotations).await
    }

    async fn fetch_manifest(&self, reference: &str) -> RegistryResult<(ArtifactManifest, String)> {
        let in_flight = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        // hold the slot long enough for the pool to fill up
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let result = self.inner.fetch_manifest(reference).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_blob(&self, reference: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        self.inner.fetch_blob(reference, digest).await
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        self.inner.list_tags(repository).await
    }

    async fn delete(&self, reference: &str) -> RegistryResult<()> {
        self.inner.delete(reference).await
    }
}

#[tokio::test]
async fn list_fans_out_in_parallel_within_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let probe = Arc::new(ConcurrencyProbe::new(DirectoryBackend::new(dir.path())));
    let registry = Registry::new(probe.clone()).with_concurrency(8);

    let artifacts = sample_artifacts();
    for index in 0..40 {
        registry
            .push(
                &format!("registry.test/floe/orders:0.0.{index}"),
                &artifacts,
                BTreeMap::new(),
            )
            .await
            .unwrap();
    }

    let listed = registry
        .list("registry.test/floe/orders", None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 40);
    // sorted by tag
    assert!(listed.windows(2).all(|pair| pair[0].tag <= pair[1].tag));

    let peak = probe.peak.load(Ordering::SeqCst);
    assert!(peak > 1, "tag fetches ran sequentially");
    assert!(peak <= 8, "worker pool exceeded its bound: {peak}");
}
