use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{VerifyError, VerifyResult};
use crate::sign::SignatureBundle;

/// Reserved annotation prefix for signature material. Non-signature
/// metadata lives under `dev.floe.<subsystem>.<name>`.
pub const SIGNATURE_PREFIX: &str = "dev.floe.signature.";

pub const BUNDLE_ANNOTATION: &str = "dev.floe.signature.bundle";
pub const MODE_ANNOTATION: &str = "dev.floe.signature.mode";
pub const ISSUER_ANNOTATION: &str = "dev.floe.signature.issuer";
pub const SUBJECT_ANNOTATION: &str = "dev.floe.signature.subject";
pub const SIGNED_AT_ANNOTATION: &str = "dev.floe.signature.signed_at";
pub const REKOR_LOG_INDEX_ANNOTATION: &str = "dev.floe.signature.rekor_log_index";
pub const CERTIFICATE_FINGERPRINT_ANNOTATION: &str =
    "dev.floe.signature.certificate_fingerprint";

/// In-toto SBOM attestation, attached by CI alongside the signature.
pub const SBOM_ATTESTATION_ANNOTATION: &str = "dev.floe.attestation.sbom";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMode {
    #[serde(rename = "keyless")]
    Keyless,
    #[serde(rename = "key-based")]
    KeyBased,
}

impl SignatureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMode::Keyless => "keyless",
            SignatureMode::KeyBased => "key-based",
        }
    }
}

/// Signature carrier stored in OCI manifest annotations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignatureMetadata {
    /// Base64 of the serialized [`SignatureBundle`].
    pub bundle: String,
    pub mode: SignatureMode,
    pub issuer: Option<String>,
    pub subject: String,
    pub signed_at: DateTime<Utc>,
    pub rekor_log_index: Option<u64>,
    /// `sha256:<hex>` over the certificate PEM.
    pub certificate_fingerprint: String,
}

impl SignatureMetadata {
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(BUNDLE_ANNOTATION.to_string(), self.bundle.clone());
        annotations.insert(MODE_ANNOTATION.to_string(), self.mode.as_str().to_string());
        if let Some(issuer) = &self.issuer {
            annotations.insert(ISSUER_ANNOTATION.to_string(), issuer.clone());
        }
        annotations.insert(SUBJECT_ANNOTATION.to_string(), self.subject.clone());
        annotations.insert(
            SIGNED_AT_ANNOTATION.to_string(),
            self.signed_at.to_rfc3339(),
        );
        if let Some(index) = self.rekor_log_index {
            annotations.insert(REKOR_LOG_INDEX_ANNOTATION.to_string(), index.to_string());
        }
        annotations.insert(
            CERTIFICATE_FINGERPRINT_ANNOTATION.to_string(),
            self.certificate_fingerprint.clone(),
        );
        annotations
    }

    /// Parse from OCI annotations. A missing bundle annotation means the
    /// artifact is unsigned, not malformed.
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> VerifyResult<Option<Self>> {
        let Some(bundle) = annotations.get(BUNDLE_ANNOTATION) else {
            return Ok(None);
        };
        let mode = match annotations.get(MODE_ANNOTATION).map(String::as_str) {
            Some("keyless") => SignatureMode::Keyless,
            Some("key-based") => SignatureMode::KeyBased,
            other => {
                return Err(VerifyError::MalformedBundle(format!(
                    "unknown signature mode {other:?}"
                )))
            }
        };
        let subject = annotations
            .get(SUBJECT_ANNOTATION)
            .cloned()
            .ok_or_else(|| VerifyError::MalformedBundle("missing subject".to_string()))?;
        let signed_at = annotations
            .get(SIGNED_AT_ANNOTATION)
            .ok_or_else(|| VerifyError::MalformedBundle("missing signed_at".to_string()))?;
        let signed_at = DateTime::parse_from_rfc3339(signed_at)
            .map_err(|e| VerifyError::MalformedBundle(format!("bad signed_at: {e}")))?
            .with_timezone(&Utc);
        let rekor_log_index = annotations
            .get(REKOR_LOG_INDEX_ANNOTATION)
            .map(|raw| {
                raw.parse::<u64>()
                    .map_err(|e| VerifyError::MalformedBundle(format!("bad rekor index: {e}")))
            })
            .transpose()?;
        let certificate_fingerprint = annotations
            .get(CERTIFICATE_FINGERPRINT_ANNOTATION)
            .cloned()
            .ok_or_else(|| {
                VerifyError::MalformedBundle("missing certificate fingerprint".to_string())
            })?;

        Ok(Some(SignatureMetadata {
            bundle: bundle.clone(),
            mode,
            issuer: annotations.get(ISSUER_ANNOTATION).cloned(),
            subject,
            signed_at,
            rekor_log_index,
            certificate_fingerprint,
        }))
    }

    /// Decode the embedded signature bundle.
    pub fn decode_bundle(&self) -> VerifyResult<SignatureBundle> {
        let raw = BASE64
            .decode(&self.bundle)
            .map_err(|e| VerifyError::MalformedBundle(format!("bundle is not base64: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| VerifyError::MalformedBundle(format!("bundle is not valid JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> SignatureMetadata {
        SignatureMetadata {
            bundle: BASE64.encode(b"{}"),
            mode: SignatureMode::Keyless,
            issuer: Some("https://token.actions.githubusercontent.com".to_string()),
            subject: "https://github.com/acme/floe/.github/workflows/release.yml".to_string(),
            signed_at: Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            rekor_log_index: Some(4242),
            certificate_fingerprint: "sha256:feedface".to_string(),
        }
    }

    #[test]
    fn annotations_round_trip() {
        let metadata = sample();
        let annotations = metadata.to_annotations();
        let parsed = SignatureMetadata::from_annotations(&annotations)
            .unwrap()
            .unwrap();
        assert_eq!(metadata, parsed);
    }

    #[test]
    fn all_signature_annotations_share_the_reserved_prefix() {
        for key in sample().to_annotations().keys() {
            assert!(key.starts_with(SIGNATURE_PREFIX), "{key} escapes the prefix");
        }
    }

    #[test]
    fn absent_bundle_means_unsigned() {
        let annotations = BTreeMap::from([(
            "dev.floe.build.commit".to_string(),
            "abc123".to_string(),
        )]);
        assert_eq!(
            SignatureMetadata::from_annotations(&annotations).unwrap(),
            None
        );
    }

    #[test]
    fn key_based_metadata_needs_no_issuer() {
        let mut metadata = sample();
        metadata.mode = SignatureMode::KeyBased;
        metadata.issuer = None;
        metadata.rekor_log_index = None;
        let parsed = SignatureMetadata::from_annotations(&metadata.to_annotations())
            .unwrap()
            .unwrap();
        assert_eq!(parsed.issuer, None);
        assert_eq!(parsed.rekor_log_index, None);
    }

    #[test]
    fn garbage_mode_is_malformed() {
        let mut annotations = sample().to_annotations();
        annotations.insert(MODE_ANNOTATION.to_string(), "psychic".to_string());
        assert!(SignatureMetadata::from_annotations(&annotations).is_err());
    }
}
