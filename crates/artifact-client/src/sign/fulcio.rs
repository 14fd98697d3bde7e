use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::errors::{SigningError, SigningResult};

use super::{CertificateMetadata, IdentityToken};

/// Narrow view of the certificate authority: exchange a proven identity and
/// a public key for a short-lived signing certificate.
#[async_trait]
pub trait FulcioApi: Send + Sync {
    async fn issue_certificate(
        &self,
        token: &IdentityToken,
        public_key_b64: &str,
    ) -> SigningResult<CertificateMetadata>;
}

pub struct FulcioRestClient {
    base_url: String,
    http: reqwest::Client,
}

// Fulcio certificates are valid for ten minutes; the expiry is carried in
// the certificate itself, this mirror is what verification inspects.
const CERTIFICATE_TTL_MINUTES: i64 = 10;

#[derive(Deserialize)]
struct SigningCertificateResponse {
    chain: CertificateChain,
}

#[derive(Deserialize)]
struct CertificateChain {
    certificates: Vec<String>,
}

impl FulcioRestClient {
    pub fn new(base_url: impl Into<String>) -> SigningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SigningError::Fulcio(format!("cannot build http client: {e}")))?;
        Ok(FulcioRestClient {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn public_good() -> SigningResult<Self> {
        FulcioRestClient::new("https://fulcio.sigstore.dev")
    }
}

#[async_trait]
impl FulcioApi for FulcioRestClient {
    async fn issue_certificate(
        &self,
        token: &IdentityToken,
        public_key_b64: &str,
    ) -> SigningResult<CertificateMetadata> {
        let body = serde_json::json!({
            "publicKeyRequest": {
                "publicKey": {
                    "algorithm": "ED25519",
                    "content": public_key_b64,
                },
                "proofOfPossession": "",
            }
        });
        let response = self
            .http
            .post(format!("{}/api/v2/signingCert", self.base_url))
            .bearer_auth(&token.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SigningError::Fulcio(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SigningError::Fulcio(format!("{status}: {message}")));
        }
        let issued: SigningCertificateResponse = response
            .json()
            .await
            .map_err(|e| SigningError::Fulcio(format!("bad certificate response: {e}")))?;
        let leaf = issued
            .chain
            .certificates
            .first()
            .ok_or_else(|| SigningError::Fulcio("empty certificate chain".to_string()))?
            .clone();

        let now = Utc::now();
        Ok(CertificateMetadata {
            issuer: Some(token.issuer.clone()),
            subject: token.subject.clone(),
            not_before: now,
            not_after: now + Duration::minutes(CERTIFICATE_TTL_MINUTES),
            fingerprint: CertificateMetadata::fingerprint_of(&leaf),
            pem: leaf,
        })
    }
}
