use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_json_bytes;
use crate::errors::{SchemaError, SchemaResult};
use crate::schema::{
    GovernanceConfig, InputPort, OutputPort, Schedule, SecretReference, Transform,
};

/// Version of the CompiledArtifacts schema itself. Consumers reject
/// documents with a different MAJOR.
pub const COMPILED_ARTIFACTS_VERSION: &str = "1.0.0";

/// Deployment shape, derived from the inheritance chain. Never an input.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Simple,
    Centralized,
    Mesh,
}

/// One resolved level of the inheritance chain, root first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// OCI URI the level was loaded from; empty for the input document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub compiled_at: DateTime<Utc>,
    pub tool_version: String,
    /// SHA-256 over the normalized concatenation of every chain input.
    pub source_hash: String,
    pub product_name: String,
    pub product_version: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// `domain.product` in mesh mode, the bare product name otherwise.
    pub product_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComputeConfig {
    pub engine: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret_ref: Option<SecretReference>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComputeRegistry {
    pub configs: BTreeMap<String, ComputeConfig>,
    pub default: String,
}

/// Resolved plugin selections, keyed by category name, plus the compute
/// registry the transforms bind against.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResolvedPlugins {
    pub compute_registry: ComputeRegistry,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selections: BTreeMap<String, PluginRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PluginRecord {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret_ref: Option<SecretReference>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Observability {
    /// Namespace telemetry is attributed to: `domain.product` in mesh mode,
    /// the product name otherwise.
    pub namespace: String,
}

/// The immutable output of a compilation: everything the deploy layer needs,
/// content-addressed by its canonical JSON bytes.
///
/// Constructed exclusively by [`crate::compile`]; read-only everywhere else.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompiledArtifacts {
    pub version: String,
    pub metadata: ArtifactMetadata,
    pub identity: Identity,
    pub mode: DeploymentMode,
    pub inheritance_chain: Vec<ManifestRef>,
    pub plugins: ResolvedPlugins,
    pub transforms: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbt: Option<serde_json::Value>,
    pub governance: GovernanceConfig,
    pub observability: Observability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ports: Option<Vec<OutputPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_ports: Option<Vec<InputPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_contracts: Option<Vec<serde_json::Value>>,
}

impl CompiledArtifacts {
    /// Canonical wire bytes: JSON, sorted keys, RFC 3339 UTC timestamps.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        canonical_json_bytes(self)
    }

    /// Parse from wire bytes, rejecting any unknown MAJOR schema version.
    pub fn from_slice(bytes: &[u8]) -> SchemaResult<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)
            .map_err(|e| SchemaError::invalid("version", format!("not a compiled artifact: {e}")))?;
        let version = semver::Version::parse(&probe.version).map_err(|_| {
            SchemaError::InvalidVersion {
                path: "version".to_string(),
                value: probe.version.clone(),
            }
        })?;
        let supported = semver::Version::parse(COMPILED_ARTIFACTS_VERSION)
            .expect("schema version constant is valid semver");
        if version.major != supported.major {
            return Err(SchemaError::invalid(
                "version",
                format!(
                    "unsupported schema major version {} (tool supports {})",
                    version, supported
                ),
            ));
        }
        serde_json::from_slice(bytes)
            .map_err(|e| SchemaError::invalid("", format!("malformed compiled artifact: {e}")))
    }

    /// Digest of the canonical bytes, `sha256:<hex>`.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        Ok(crate::canonical::source_hash([self
            .to_canonical_json()?
            .as_slice()]))
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}
