use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SigningError, SigningResult};

/// Proof that a signing event was recorded in the transparency log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RekorEntry {
    pub log_index: u64,
    pub uuid: String,
    pub integrated_time: DateTime<Utc>,
}

#[async_trait]
pub trait RekorApi: Send + Sync {
    /// Append a hashed-rekord entry for the signed digest.
    async fn append(
        &self,
        digest: &str,
        signature_b64: &str,
        public_key_b64: &str,
    ) -> SigningResult<RekorEntry>;

    /// Confirm the log still contains the entry for this digest.
    async fn verify_inclusion(&self, entry: &RekorEntry, digest: &str) -> SigningResult<bool>;
}

pub struct RekorRestClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntryBody {
    log_index: u64,
    integrated_time: i64,
}

impl RekorRestClient {
    pub fn new(base_url: impl Into<String>) -> SigningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SigningError::Rekor(format!("cannot build http client: {e}")))?;
        Ok(RekorRestClient {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn public_good() -> SigningResult<Self> {
        RekorRestClient::new("https://rekor.sigstore.dev")
    }

    fn hashed_rekord(digest: &str, signature_b64: &str, public_key_b64: &str) -> serde_json::Value {
        let hex_digest = digest.strip_prefix("sha256:").unwrap_or(digest);
        serde_json::json!({
            "apiVersion": "0.0.1",
            "kind": "hashedrekord",
            "spec": {
                "data": {
                    "hash": { "algorithm": "sha256", "value": hex_digest }
                },
                "signature": {
                    "content": signature_b64,
                    "publicKey": { "content": public_key_b64 }
                }
            }
        })
    }
}

#[async_trait]
impl RekorApi for RekorRestClient {
    async fn append(
        &self,
        digest: &str,
        signature_b64: &str,
        public_key_b64: &str,
    ) -> SigningResult<RekorEntry> {
        let response = self
            .http
            .post(format!("{}/api/v1/log/entries", self.base_url))
            .json(&Self::hashed_rekord(digest, signature_b64, public_key_b64))
            .send()
            .await
            .map_err(|e| SigningError::Rekor(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SigningError::Rekor(format!("{status}: {message}")));
        }
        // the response is a single-entry map keyed by the entry uuid
        let entries: HashMap<String, LogEntryBody> = response
            .json()
            .await
            .map_err(|e| SigningError::Rekor(format!("bad log entry response: {e}")))?;
        let (uuid, body) = entries
            .into_iter()
            .next()
            .ok_or_else(|| SigningError::Rekor("empty log entry response".to_string()))?;
        let integrated_time = Utc
            .timestamp_opt(body.integrated_time, 0)
            .single()
            .ok_or_else(|| SigningError::Rekor("bad integratedTime".to_string()))?;
        Ok(RekorEntry {
            log_index: body.log_index,
            uuid,
            integrated_time,
        })
    }

    async fn verify_inclusion(&self, entry: &RekorEntry, _digest: &str) -> SigningResult<bool> {
        let response = self
            .http
            .get(format!(
                "{}/api/v1/log/entries/{}",
                self.base_url, entry.uuid
            ))
            .send()
            .await
            .map_err(|e| SigningError::Rekor(e.to_string()))?;
        Ok(response.status().is_success())
    }
}
