use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use floe_compiler::{SecretReference, SecretSource};

use crate::annotations::{SignatureMetadata, SignatureMode};
use crate::errors::{SigningError, SigningResult};

mod fulcio;
mod oidc;
mod rekor;

pub use fulcio::{FulcioApi, FulcioRestClient};
pub use oidc::{
    IdentityToken, OidcProvider, OidcRestClientConfig, OidcRestProvider, StaticTokenProvider,
};
pub use rekor::{RekorApi, RekorEntry, RekorRestClient};

/// Carrier metadata of a signing certificate. The certificate itself stays
/// an opaque PEM blob; verification inspects only these fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CertificateMetadata {
    pub issuer: Option<String>,
    pub subject: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// `sha256:<hex>` over the PEM bytes.
    pub fingerprint: String,
    pub pem: String,
}

impl CertificateMetadata {
    pub fn fingerprint_of(pem: &str) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(pem.as_bytes())))
    }
}

/// The serialized signature: everything verification needs, online or
/// air-gapped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignatureBundle {
    /// Digest the signature covers, `sha256:<hex>`.
    pub artifact_digest: String,
    /// Base64 ed25519 signature over the digest string bytes.
    pub signature: String,
    /// Base64 raw verifying key bound by the certificate.
    pub public_key: String,
    pub certificate: CertificateMetadata,
    pub mode: SignatureMode,
    pub signed_at: DateTime<Utc>,
    pub rekor_entry: Option<RekorEntry>,
}

impl SignatureBundle {
    pub fn encode(&self) -> SigningResult<String> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    pub fn into_metadata(self) -> SigningResult<SignatureMetadata> {
        let bundle = self.encode()?;
        Ok(SignatureMetadata {
            bundle,
            mode: self.mode,
            issuer: self.certificate.issuer.clone(),
            subject: self.certificate.subject.clone(),
            signed_at: self.signed_at,
            rekor_log_index: self.rekor_entry.as_ref().map(|entry| entry.log_index),
            certificate_fingerprint: self.certificate.fingerprint.clone(),
        })
    }
}

/// Resolves secret references to raw key material. Only the `env` source is
/// dereferenced by the CLI; cluster-side sources belong to the deploy layer.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, secret_ref: &SecretReference) -> SigningResult<Vec<u8>>;
}

/// Reads base64-encoded key seeds from process environment variables.
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, secret_ref: &SecretReference) -> SigningResult<Vec<u8>> {
        if secret_ref.source != SecretSource::Env {
            return Err(SigningError::SecretResolution {
                name: secret_ref.name.clone(),
                reason: format!(
                    "secret source {:?} cannot be dereferenced at signing time",
                    secret_ref.source
                ),
            });
        }
        let variable = secret_ref.name.replace('-', "_").to_uppercase();
        let value = std::env::var(&variable).map_err(|_| SigningError::SecretResolution {
            name: secret_ref.name.clone(),
            reason: format!("environment variable {variable} is not set"),
        })?;
        BASE64
            .decode(value.trim())
            .map_err(|e| SigningError::SecretResolution {
                name: secret_ref.name.clone(),
                reason: format!("value is not base64: {e}"),
            })
    }
}

/// Produces Sigstore-style signatures over artifact digests.
///
/// Keyless signing exchanges an OIDC identity for a short-lived certificate
/// and writes a transparency-log entry; key-based signing uses a long-lived
/// key from a secret reference and records Rekor only on request. Signing is
/// serialized per digest so concurrent pushes of the same artifact cannot
/// race a double-sign; verification never takes these locks.
pub struct SigningEngine {
    oidc: Arc<dyn OidcProvider>,
    fulcio: Arc<dyn FulcioApi>,
    rekor: Arc<dyn RekorApi>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SigningEngine {
    pub fn new(
        oidc: Arc<dyn OidcProvider>,
        fulcio: Arc<dyn FulcioApi>,
        rekor: Arc<dyn RekorApi>,
    ) -> Self {
        SigningEngine {
            oidc,
            fulcio,
            rekor,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, digest: &str) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(digest.to_string()).or_default().clone()
    }

    /// Keyless: OIDC token, ephemeral key, Fulcio certificate, Rekor entry.
    pub async fn sign_keyless(&self, digest: &str) -> SigningResult<SignatureMetadata> {
        let guard = self.lock_for(digest).await;
        let _held = guard.lock().await;

        let token = retry_once(|| self.oidc.acquire_token()).await?;
        debug!(issuer = token.issuer.as_str(), "acquired OIDC identity");

        let key = SigningKey::generate(&mut OsRng);
        let public_key = BASE64.encode(key.verifying_key().to_bytes());
        let certificate =
            retry_once(|| self.fulcio.issue_certificate(&token, &public_key)).await?;

        let signature = BASE64.encode(key.sign(digest.as_bytes()).to_bytes());
        let rekor_entry = Some(
            retry_once(|| self.rekor.append(digest, &signature, &public_key)).await?,
        );

        let bundle = SignatureBundle {
            artifact_digest: digest.to_string(),
            signature,
            public_key,
            certificate,
            mode: SignatureMode::Keyless,
            signed_at: Utc::now(),
            rekor_entry,
        };
        info!(digest, mode = "keyless", "artifact signed");
        bundle.into_metadata()
    }

    /// Key-based: long-lived key from a secret reference; Rekor optional.
    pub async fn sign_with_key(
        &self,
        digest: &str,
        secret_ref: &SecretReference,
        resolver: &dyn SecretResolver,
        record_rekor: bool,
    ) -> SigningResult<SignatureMetadata> {
        let guard = self.lock_for(digest).await;
        let _held = guard.lock().await;

        let seed = resolver.resolve(secret_ref)?;
        let seed: [u8; 32] = seed.as_slice().try_into().map_err(|_| {
            SigningError::InvalidKey(format!(
                "expected a 32-byte ed25519 seed, got {} bytes",
                seed.len()
            ))
        })?;
        let key = SigningKey::from_bytes(&seed);
        let public_key = BASE64.encode(key.verifying_key().to_bytes());
        let signature = BASE64.encode(key.sign(digest.as_bytes()).to_bytes());

        let signed_at = Utc::now();
        let pem = self_issued_key_pem(&public_key);
        let certificate = CertificateMetadata {
            issuer: None,
            subject: format!("key:{}", secret_ref.name),
            not_before: signed_at,
            // long-lived key: the verification window is policy-driven
            not_after: signed_at + Duration::days(365),
            fingerprint: CertificateMetadata::fingerprint_of(&pem),
            pem,
        };

        let rekor_entry = if record_rekor {
            Some(retry_once(|| self.rekor.append(digest, &signature, &public_key)).await?)
        } else {
            None
        };

        let bundle = SignatureBundle {
            artifact_digest: digest.to_string(),
            signature,
            public_key,
            certificate,
            mode: SignatureMode::KeyBased,
            signed_at,
            rekor_entry,
        };
        info!(digest, mode = "key-based", "artifact signed");
        bundle.into_metadata()
    }
}

fn self_issued_key_pem(public_key_b64: &str) -> String {
    format!(
        "-----BEGIN PUBLIC KEY-----\n{public_key_b64}\n-----END PUBLIC KEY-----\n"
    )
}

/// Signing collaborators are retried exactly once on failure.
async fn retry_once<T, F, Fut>(mut operation: F) -> SigningResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = SigningResult<T>>,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(error = %first, "signing collaborator failed, retrying once");
            operation().await
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

    const DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";

    #[tokio::test]
    async fn keyless_signature_verifies_with_the_bundled_key() {
        let engine = fakes::engine();
        let metadata = engine.sign_keyless(DIGEST).await.unwrap();
        assert_eq!(metadata.mode, SignatureMode::Keyless);
        assert_eq!(metadata.issuer.as_deref(), Some("https://oidc.test"));
        assert!(metadata.rekor_log_index.is_some());

        let bundle = metadata.decode_bundle().unwrap();
        assert_eq!(bundle.artifact_digest, DIGEST);
        let key_bytes: [u8; 32] = BASE64
            .decode(&bundle.public_key)
            .unwrap()
            .try_into()
            .unwrap();
        let key = VerifyingKey::from_bytes(&key_bytes).unwrap();
        let sig_bytes: [u8; 64] = BASE64
            .decode(&bundle.signature)
            .unwrap()
            .try_into()
            .unwrap();
        key.verify(DIGEST.as_bytes(), &Signature::from_bytes(&sig_bytes))
            .unwrap();
    }

    #[tokio::test]
    async fn key_based_signing_skips_rekor_unless_asked() {
        let engine = fakes::engine();
        let seed = [7u8; 32];
        std::env::set_var("RELEASE_KEY", BASE64.encode(seed));
        let secret_ref = SecretReference {
            source: SecretSource::Env,
            name: "release-key".to_string(),
            key: None,
        };
        let metadata = engine
            .sign_with_key(DIGEST, &secret_ref, &EnvSecretResolver, false)
            .await
            .unwrap();
        assert_eq!(metadata.mode, SignatureMode::KeyBased);
        assert_eq!(metadata.issuer, None);
        assert_eq!(metadata.rekor_log_index, None);

        let with_rekor = engine
            .sign_with_key(DIGEST, &secret_ref, &EnvSecretResolver, true)
            .await
            .unwrap();
        assert!(with_rekor.rekor_log_index.is_some());
    }

    #[tokio::test]
    async fn non_env_secret_sources_are_refused() {
        let engine = fakes::engine();
        let secret_ref = SecretReference {
            source: SecretSource::Vault,
            name: "release-key".to_string(),
            key: None,
        };
        let err = engine
            .sign_with_key(DIGEST, &secret_ref, &EnvSecretResolver, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::SecretResolution { .. }));
    }

    #[tokio::test]
    async fn flaky_collaborators_are_retried_once() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let result: SigningResult<u32> = retry_once(|| {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(SigningError::Oidc("transient".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
