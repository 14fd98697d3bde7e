use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::File;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::error;

use crate::errors::{RegistryError, RegistryResult};

#[derive(Deserialize, Debug)]
pub(crate) struct RegistryAuthRaw {
    // `auth` is optional because we have to be liberal in what we accept:
    // tools rewrite config.json and leave syntactically valid but
    // semantically empty entries behind.
    auth: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct DockerConfigRaw {
    auths: HashMap<String, RegistryAuthRaw>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RegistryCredentials {
    BasicAuth(String, String),
}

/// Registry credentials in docker `config.json` form.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DockerConfig {
    pub auths: HashMap<String, RegistryCredentials>,
}

impl DockerConfig {
    /// Credentials for a registry host, with the `OCI_REGISTRY_USER` /
    /// `OCI_REGISTRY_PASSWORD` pair taking precedence over the file.
    pub fn credentials_for(&self, registry: &str) -> Option<RegistryCredentials> {
        if let (Ok(user), Ok(password)) = (
            std::env::var("OCI_REGISTRY_USER"),
            std::env::var("OCI_REGISTRY_PASSWORD"),
        ) {
            return Some(RegistryCredentials::BasicAuth(user, password));
        }
        self.auths.get(registry).cloned()
    }
}

impl TryFrom<DockerConfigRaw> for DockerConfig {
    type Error = RegistryError;

    fn try_from(raw: DockerConfigRaw) -> RegistryResult<Self> {
        Ok(DockerConfig {
            auths: raw
                .auths
                .into_iter()
                .filter_map(|(host, auth)| match decode_auth(auth) {
                    Ok(credentials) => credentials.map(|credentials| (host, credentials)),
                    Err(reason) => {
                        error!(host = %host, reason, "ignoring malformed registry auth entry");
                        None
                    }
                })
                .collect(),
        })
    }
}

fn decode_auth(raw: RegistryAuthRaw) -> Result<Option<RegistryCredentials>, String> {
    let Some(auth) = raw.auth else {
        return Ok(None);
    };
    let decoded = BASE64
        .decode(auth.trim())
        .map_err(|e| format!("invalid base64 encoding: {e}"))?;
    let decoded = String::from_utf8(decoded).map_err(|e| format!("not utf-8: {e}"))?;
    match decoded.split_once(':') {
        Some((user, password)) => Ok(Some(RegistryCredentials::BasicAuth(
            user.to_string(),
            password.to_string(),
        ))),
        None => Err("basic auth is not in the form username:password".to_string()),
    }
}

pub fn read_docker_config_json_file(path: &Path) -> RegistryResult<DockerConfig> {
    let raw: DockerConfigRaw = serde_json::from_reader(File::open(path)?).map_err(|e| {
        RegistryError::Malformed {
            reference: path.display().to_string(),
            reason: format!("not a docker config.json: {e}"),
        }
    })?;
    DockerConfig::try_from(raw)
}
