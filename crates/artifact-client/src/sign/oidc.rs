use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::errors::{SigningError, SigningResult};

/// An acquired OIDC identity: the raw token stays opaque, only the carrier
/// claims are inspected by the signing flow.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    pub token: String,
    pub issuer: String,
    pub subject: String,
}

#[async_trait]
pub trait OidcProvider: Send + Sync {
    async fn acquire_token(&self) -> SigningResult<IdentityToken>;
}

/// Uses a token handed in from the environment (CI injects one); claims are
/// read from the JWT payload without signature validation, which is Fulcio's
/// job, not ours.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        StaticTokenProvider {
            token: token.into(),
        }
    }

    pub fn from_env() -> SigningResult<Self> {
        let token = std::env::var("FLOE_OIDC_TOKEN")
            .map_err(|_| SigningError::Oidc("FLOE_OIDC_TOKEN is not set".to_string()))?;
        Ok(StaticTokenProvider::new(token))
    }
}

#[derive(Deserialize)]
struct Claims {
    iss: String,
    #[serde(default)]
    email: Option<String>,
    sub: String,
}

fn claims_of(token: &str) -> SigningResult<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| SigningError::Oidc("token is not a JWT".to_string()))?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| SigningError::Oidc(format!("token payload is not base64url: {e}")))?;
    serde_json::from_slice(&payload)
        .map_err(|e| SigningError::Oidc(format!("token payload is not JSON: {e}")))
}

#[async_trait]
impl OidcProvider for StaticTokenProvider {
    async fn acquire_token(&self) -> SigningResult<IdentityToken> {
        let claims = claims_of(&self.token)?;
        Ok(IdentityToken {
            token: self.token.clone(),
            subject: claims.email.unwrap_or(claims.sub),
            issuer: claims.iss,
        })
    }
}

/// Device-flow exchange against an OIDC issuer, for interactive use.
pub struct OidcRestClientConfig {
    pub issuer_url: String,
    pub client_id: String,
}

pub struct OidcRestProvider {
    config: OidcRestClientConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    verification_uri_complete: Option<String>,
    verification_uri: String,
    user_code: String,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    error: Option<String>,
}

impl OidcRestProvider {
    pub fn new(config: OidcRestClientConfig) -> SigningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SigningError::Oidc(format!("cannot build http client: {e}")))?;
        Ok(OidcRestProvider { config, http })
    }

    async fn request_device_code(&self) -> SigningResult<DeviceAuthorization> {
        let response = self
            .http
            .post(format!("{}/device/code", self.config.issuer_url))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", "openid email"),
            ])
            .send()
            .await
            .map_err(|e| SigningError::Oidc(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| SigningError::Oidc(format!("bad device authorization response: {e}")))
    }

    async fn poll_for_token(&self, authorization: &DeviceAuthorization) -> SigningResult<String> {
        // bounded poll: the device grant expires server-side anyway
        for _ in 0..60 {
            tokio::time::sleep(std::time::Duration::from_secs(authorization.interval)).await;
            let response: TokenResponse = self
                .http
                .post(format!("{}/token", self.config.issuer_url))
                .form(&[
                    ("client_id", self.config.client_id.as_str()),
                    ("device_code", authorization.device_code.as_str()),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ])
                .send()
                .await
                .map_err(|e| SigningError::Oidc(e.to_string()))?
                .json()
                .await
                .map_err(|e| SigningError::Oidc(format!("bad token response: {e}")))?;
            if let Some(token) = response.id_token {
                return Ok(token);
            }
            match response.error.as_deref() {
                Some("authorization_pending") | Some("slow_down") => continue,
                Some(error) => return Err(SigningError::Oidc(error.to_string())),
                None => continue,
            }
        }
        Err(SigningError::Oidc(
            "device authorization was never approved".to_string(),
        ))
    }
}

#[async_trait]
impl OidcProvider for OidcRestProvider {
    async fn acquire_token(&self) -> SigningResult<IdentityToken> {
        let authorization = self.request_device_code().await?;
        let url = authorization
            .verification_uri_complete
            .as_deref()
            .unwrap_or(authorization.verification_uri.as_str());
        tracing::info!(
            url,
            code = authorization.user_code.as_str(),
            "complete the OIDC device flow in a browser"
        );
        let token = self.poll_for_token(&authorization).await?;
        let claims = claims_of(&token)?;
        Ok(IdentityToken {
            token,
            subject: claims.email.unwrap_or(claims.sub),
            issuer: claims.iss,
        })
    }
}
