use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations::SignatureMetadata;
use crate::errors::{VerifyError, VerifyResult};
use crate::sign::{RekorEntry, SignatureBundle};

/// Everything an air-gapped site needs to verify one artifact. Exported by
/// a connected host, shipped alongside the artifact, consumed by
/// `verify --bundle` without any network access.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerificationBundle {
    pub artifact_digest: String,
    pub sigstore_bundle: SignatureBundle,
    pub certificate_chain: Vec<String>,
    pub rekor_entry: Option<RekorEntry>,
    pub created_at: DateTime<Utc>,
}

/// Build the offline bundle from a signed artifact's metadata.
pub fn export_bundle(
    artifact_digest: &str,
    metadata: &SignatureMetadata,
) -> VerifyResult<VerificationBundle> {
    let sigstore_bundle = metadata.decode_bundle()?;
    if sigstore_bundle.artifact_digest != artifact_digest {
        return Err(VerifyError::MalformedBundle(format!(
            "signature covers {} but the artifact digest is {}",
            sigstore_bundle.artifact_digest, artifact_digest
        )));
    }
    pem::parse(sigstore_bundle.certificate.pem.as_bytes())
        .map_err(|e| VerifyError::MalformedBundle(format!("certificate is not valid PEM: {e}")))?;
    Ok(VerificationBundle {
        artifact_digest: artifact_digest.to_string(),
        certificate_chain: vec![sigstore_bundle.certificate.pem.clone()],
        rekor_entry: sigstore_bundle.rekor_entry.clone(),
        sigstore_bundle,
        created_at: Utc::now(),
    })
}

impl VerificationBundle {
    pub fn to_json(&self) -> VerifyResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| VerifyError::MalformedBundle(format!("cannot serialize bundle: {e}")))
    }

    pub fn from_json(bytes: &[u8]) -> VerifyResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VerifyError::MalformedBundle(format!("cannot parse bundle: {e}")))
    }
}
