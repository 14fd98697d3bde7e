use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::annotations::{SignatureMetadata, SBOM_ATTESTATION_ANNOTATION};
use crate::audit::{AuditSink, VerificationAuditEvent};
use crate::bundle::VerificationBundle;
use crate::errors::{VerifyError, VerifyResult};
use crate::sign::{RekorApi, SignatureBundle};

mod config;

pub use config::{
    default_policy_yaml, read_policy_file, EnforcementMode, EnvironmentPolicy, TrustedIssuer,
    VerificationPolicy,
};

/// Signature state attached to every pulled artifact (I7).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureStatus {
    Valid,
    Invalid,
    Unsigned,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub status: SignatureStatus,
    pub enforcement: EnforcementMode,
    pub reasons: Vec<String>,
}

impl VerificationResult {
    fn passed(&self) -> bool {
        self.status == SignatureStatus::Valid
    }
}

/// Walks a [`VerificationPolicy`] over signature material.
///
/// Verification is read-only and freely parallel; it never takes the signing
/// locks. Every decision is emitted to the audit sink, pass or fail.
pub struct Verifier {
    rekor: Option<Arc<dyn RekorApi>>,
    audit: Arc<AuditSink>,
}

impl Verifier {
    pub fn new(rekor: Option<Arc<dyn RekorApi>>, audit: Arc<AuditSink>) -> Self {
        Verifier { rekor, audit }
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    pub async fn verify(
        &self,
        reference: &str,
        artifact_digest: &str,
        metadata: Option<&SignatureMetadata>,
        annotations: &BTreeMap<String, String>,
        policy: &VerificationPolicy,
        environment: Option<&str>,
    ) -> VerifyResult<VerificationResult> {
        self.verify_at(
            reference,
            artifact_digest,
            metadata,
            annotations,
            policy,
            environment,
            Utc::now(),
        )
        .await
    }

    /// Air-gapped verification: everything comes from the exported bundle
    /// and Rekor is never contacted; a recorded entry in the bundle
    /// satisfies `require_rekor`.
    pub async fn verify_with_bundle(
        &self,
        bundle: &VerificationBundle,
        policy: &VerificationPolicy,
        environment: Option<&str>,
    ) -> VerifyResult<VerificationResult> {
        let offline = Verifier {
            rekor: None,
            audit: self.audit.clone(),
        };
        offline
            .verify_bundle_at(
                "offline-bundle",
                &bundle.artifact_digest,
                &bundle.sigstore_bundle,
                &BTreeMap::new(),
                policy,
                environment,
                Utc::now(),
            )
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn verify_at(
        &self,
        reference: &str,
        artifact_digest: &str,
        metadata: Option<&SignatureMetadata>,
        annotations: &BTreeMap<String, String>,
        policy: &VerificationPolicy,
        environment: Option<&str>,
        now: DateTime<Utc>,
    ) -> VerifyResult<VerificationResult> {
        if !policy.enabled {
            return Ok(VerificationResult {
                status: SignatureStatus::Unsigned,
                enforcement: policy.effective_enforcement(environment),
                reasons: vec![],
            });
        }
        let enforcement = policy.effective_enforcement(environment);
        if enforcement == EnforcementMode::Off {
            let status = if metadata.is_some() {
                SignatureStatus::Unknown
            } else {
                SignatureStatus::Unsigned
            };
            return Ok(VerificationResult {
                status,
                enforcement,
                reasons: vec![],
            });
        }

        let Some(metadata) = metadata else {
            let result = VerificationResult {
                status: SignatureStatus::Unsigned,
                enforcement,
                reasons: vec!["artifact carries no signature".to_string()],
            };
            return self.conclude(reference, artifact_digest, environment, result);
        };

        let bundle = match metadata.decode_bundle() {
            Ok(bundle) => bundle,
            Err(error) => {
                let result = VerificationResult {
                    status: SignatureStatus::Invalid,
                    enforcement,
                    reasons: vec![format!("signature bundle is unreadable: {error}")],
                };
                return self.conclude(reference, artifact_digest, environment, result);
            }
        };

        self.verify_bundle_at(
            reference,
            artifact_digest,
            &bundle,
            annotations,
            policy,
            environment,
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn verify_bundle_at(
        &self,
        reference: &str,
        artifact_digest: &str,
        bundle: &SignatureBundle,
        annotations: &BTreeMap<String, String>,
        policy: &VerificationPolicy,
        environment: Option<&str>,
        now: DateTime<Utc>,
    ) -> VerifyResult<VerificationResult> {
        let enforcement = policy.effective_enforcement(environment);
        let mut failures: Vec<String> = Vec::new();
        let mut transient: Vec<String> = Vec::new();

        if bundle.artifact_digest != artifact_digest {
            failures.push(format!(
                "signature covers {} but the artifact digest is {}",
                bundle.artifact_digest, artifact_digest
            ));
        }

        if let Err(reason) = check_signature(bundle, artifact_digest) {
            failures.push(reason);
        }

        if let Err(reason) = check_certificate_validity(bundle, policy.grace_period_days, now) {
            failures.push(reason);
        }

        if !policy.trusted_issuers.is_empty() {
            let issuer = bundle.certificate.issuer.as_deref().unwrap_or_default();
            let subject = bundle.certificate.subject.as_str();
            let trusted = policy
                .trusted_issuers
                .iter()
                .any(|candidate| candidate.matches(issuer, subject));
            if !trusted {
                failures.push(format!(
                    "signer {subject} from issuer {issuer:?} is not a trusted issuer"
                ));
            }
        }

        if policy.require_rekor {
            match (&bundle.rekor_entry, &self.rekor) {
                (None, _) => {
                    failures.push("policy requires a rekor entry, none recorded".to_string())
                }
                (Some(entry), Some(rekor)) => {
                    match rekor.verify_inclusion(entry, artifact_digest).await {
                        Ok(true) => {}
                        Ok(false) => failures.push(format!(
                            "rekor entry {} is not included in the log",
                            entry.uuid
                        )),
                        Err(error) => transient.push(format!(
                            "cannot confirm rekor inclusion for {}: {error}",
                            entry.uuid
                        )),
                    }
                }
                // offline: the recorded entry itself is the proof
                (Some(_), None) => {}
            }
        }

        if policy.require_sbom && !annotations.contains_key(SBOM_ATTESTATION_ANNOTATION) {
            failures.push("policy requires an sbom attestation, none attached".to_string());
        }

        let status = if !failures.is_empty() {
            SignatureStatus::Invalid
        } else if !transient.is_empty() {
            SignatureStatus::Unknown
        } else {
            SignatureStatus::Valid
        };
        failures.extend(transient);
        let result = VerificationResult {
            status,
            enforcement,
            reasons: failures,
        };
        self.conclude(reference, artifact_digest, environment, result)
    }

    fn conclude(
        &self,
        reference: &str,
        artifact_digest: &str,
        environment: Option<&str>,
        result: VerificationResult,
    ) -> VerifyResult<VerificationResult> {
        self.audit.emit(VerificationAuditEvent {
            reference: reference.to_string(),
            artifact_digest: Some(artifact_digest.to_string()),
            signature_status: result.status,
            enforcement: result.enforcement,
            environment: environment.map(str::to_string),
            reasons: result.reasons.clone(),
            occurred_at: Utc::now(),
        });
        debug!(
            reference,
            status = ?result.status,
            "verification concluded"
        );
        if result.enforcement == EnforcementMode::Enforce && !result.passed() {
            return Err(VerifyError::SignatureVerification {
                reference: reference.to_string(),
                reasons: result.reasons,
            });
        }
        Ok(result)
    }
}

fn check_signature(bundle: &SignatureBundle, artifact_digest: &str) -> Result<(), String> {
    let key: [u8; 32] = BASE64
        .decode(&bundle.public_key)
        .map_err(|e| format!("public key is not base64: {e}"))?
        .try_into()
        .map_err(|_| "public key has the wrong length".to_string())?;
    let key = VerifyingKey::from_bytes(&key).map_err(|e| format!("bad public key: {e}"))?;
    let signature: [u8; 64] = BASE64
        .decode(&bundle.signature)
        .map_err(|e| format!("signature is not base64: {e}"))?
        .try_into()
        .map_err(|_| "signature has the wrong length".to_string())?;
    key.verify(artifact_digest.as_bytes(), &Signature::from_bytes(&signature))
        .map_err(|_| "signature does not match the artifact digest".to_string())
}

/// Certificates are accepted through the configured grace window after
/// expiry; an expiry exactly `grace_period_days` old is still accepted, one
/// day beyond is not.
fn check_certificate_validity(
    bundle: &SignatureBundle,
    grace_period_days: i64,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let certificate = &bundle.certificate;
    if certificate.not_before > now {
        return Err(format!(
            "certificate is not valid before {}",
            certificate.not_before.to_rfc3339()
        ));
    }
    if certificate.not_after >= now {
        return Ok(());
    }
    let expired_for = now - certificate.not_after;
    if expired_for <= Duration::days(grace_period_days) {
        debug!(
            fingerprint = certificate.fingerprint.as_str(),
            expired_days = expired_for.num_days(),
            "certificate expired but inside the rotation grace window"
        );
        return Ok(());
    }
    Err(format!(
        "certificate expired {} ago, grace window is {} days",
        expired_for, grace_period_days
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::fakes;

    const DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

    async fn signed_metadata() -> SignatureMetadata {
        fakes::engine().sign_keyless(DIGEST).await.unwrap()
    }

    fn verifier() -> Verifier {
        Verifier::new(
            Some(Arc::new(fakes::FakeRekor::default())),
            Arc::new(AuditSink::new()),
        )
    }

    fn enabled_policy() -> VerificationPolicy {
        VerificationPolicy {
            enabled: true,
            enforcement: EnforcementMode::Enforce,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn valid_signature_passes_under_enforce() {
        let metadata = signed_metadata().await;
        let verifier = verifier();
        let result = verifier
            .verify(
                "registry.test/floe/orders:1",
                DIGEST,
                Some(&metadata),
                &BTreeMap::new(),
                &enabled_policy(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);
        assert!(result.reasons.is_empty());
        let events = verifier.audit().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].signature_status, SignatureStatus::Valid);
    }

    #[tokio::test]
    async fn unsigned_artifact_under_enforce_is_an_error_with_audit() {
        let verifier = verifier();
        let err = verifier
            .verify(
                "registry.test/floe/orders:1",
                DIGEST,
                None,
                &BTreeMap::new(),
                &enabled_policy(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::SignatureVerification { .. }));
        let events = verifier.audit().snapshot();
        assert_eq!(events[0].signature_status, SignatureStatus::Unsigned);
    }

    #[tokio::test]
    async fn unsigned_artifact_under_warn_is_returned_with_status() {
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        let verifier = verifier();
        let result = verifier
            .verify(
                "registry.test/floe/orders:1",
                DIGEST,
                None,
                &BTreeMap::new(),
                &policy,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Unsigned);
        assert_eq!(verifier.audit().snapshot().len(), 1);
    }

    #[tokio::test]
    async fn disabled_policy_skips_verification_entirely() {
        let verifier = verifier();
        let result = verifier
            .verify(
                "registry.test/floe/orders:1",
                DIGEST,
                None,
                &BTreeMap::new(),
                &VerificationPolicy::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Unsigned);
        assert!(verifier.audit().snapshot().is_empty());
    }

    #[tokio::test]
    async fn environment_override_escalates_to_enforce() {
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        policy.environments.insert(
            "production".to_string(),
            EnvironmentPolicy {
                enforcement: EnforcementMode::Enforce,
            },
        );
        let verifier = verifier();
        // staging warns
        assert!(verifier
            .verify(
                "r",
                DIGEST,
                None,
                &BTreeMap::new(),
                &policy,
                Some("staging")
            )
            .await
            .is_ok());
        // production enforces
        assert!(verifier
            .verify(
                "r",
                DIGEST,
                None,
                &BTreeMap::new(),
                &policy,
                Some("production")
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn tampered_digest_is_invalid() {
        let metadata = signed_metadata().await;
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        let other_digest =
            "sha256:3333333333333333333333333333333333333333333333333333333333333333";
        let result = verifier()
            .verify(
                "r",
                other_digest,
                Some(&metadata),
                &BTreeMap::new(),
                &policy,
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Invalid);
        assert!(!result.reasons.is_empty());
    }

    #[tokio::test]
    async fn untrusted_issuer_is_invalid() {
        let metadata = signed_metadata().await;
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        policy.trusted_issuers = vec![TrustedIssuer {
            issuer: "https://completely-different.test".to_string(),
            subject: Some("release@acme.dev".to_string()),
            subject_regex: None,
        }];
        let result = verifier()
            .verify("r", DIGEST, Some(&metadata), &BTreeMap::new(), &policy, None)
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Invalid);
    }

    #[tokio::test]
    async fn trusted_issuer_with_matching_subject_passes() {
        let metadata = signed_metadata().await;
        let mut policy = enabled_policy();
        policy.trusted_issuers = vec![TrustedIssuer {
            issuer: "https://oidc.test".to_string(),
            subject: Some("release@acme.dev".to_string()),
            subject_regex: None,
        }];
        let result = verifier()
            .verify("r", DIGEST, Some(&metadata), &BTreeMap::new(), &policy, None)
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);
    }

    #[tokio::test]
    async fn grace_period_boundary_is_inclusive() {
        let metadata = signed_metadata().await;
        let bundle = metadata.decode_bundle().unwrap();
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        policy.grace_period_days = 7;

        // expired by grace - 1 days: accepted
        let just_inside = bundle.certificate.not_after + Duration::days(6);
        let result = verifier()
            .verify_at(
                "r",
                DIGEST,
                Some(&metadata),
                &BTreeMap::new(),
                &policy,
                None,
                just_inside,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);

        // expired by exactly grace days: still accepted
        let boundary = bundle.certificate.not_after + Duration::days(7);
        let result = verifier()
            .verify_at(
                "r",
                DIGEST,
                Some(&metadata),
                &BTreeMap::new(),
                &policy,
                None,
                boundary,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);

        // expired by grace + 1 days: rejected
        let beyond = bundle.certificate.not_after + Duration::days(8);
        let result = verifier()
            .verify_at(
                "r",
                DIGEST,
                Some(&metadata),
                &BTreeMap::new(),
                &policy,
                None,
                beyond,
            )
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Invalid);
    }

    #[tokio::test]
    async fn require_sbom_fails_without_attestation() {
        let metadata = signed_metadata().await;
        let mut policy = enabled_policy();
        policy.enforcement = EnforcementMode::Warn;
        policy.require_sbom = true;
        let result = verifier()
            .verify("r", DIGEST, Some(&metadata), &BTreeMap::new(), &policy, None)
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Invalid);

        let annotations = BTreeMap::from([(
            SBOM_ATTESTATION_ANNOTATION.to_string(),
            "e30=".to_string(),
        )]);
        let result = verifier()
            .verify("r", DIGEST, Some(&metadata), &annotations, &policy, None)
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);
    }

    #[tokio::test]
    async fn offline_bundle_satisfies_rekor_without_contact() {
        let metadata = signed_metadata().await;
        let bundle = crate::bundle::export_bundle(DIGEST, &metadata).unwrap();
        let mut policy = enabled_policy();
        policy.require_rekor = true;
        // verifier without any rekor client: must still pass offline
        let verifier = Verifier::new(None, Arc::new(AuditSink::new()));
        let result = verifier
            .verify_with_bundle(&bundle, &policy, None)
            .await
            .unwrap();
        assert_eq!(result.status, SignatureStatus::Valid);
    }
}
