use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{SchemaError, SchemaResult};

/// Canonical bytes of any serializable document.
///
/// `serde_json` maps are BTreeMap-backed, so re-serializing through
/// `serde_json::Value` yields sorted keys; the compact encoding has no
/// trailing whitespace and no line endings to normalize. The same bytes feed
/// both the source hash and the artifact wire format.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

/// Normalize one YAML input document to its canonical byte form.
pub fn normalize_document(bytes: &[u8]) -> SchemaResult<Vec<u8>> {
    let value: serde_json::Value = serde_yaml::from_slice(bytes)?;
    canonical_json_bytes(&value)
        .map_err(|e| SchemaError::invalid("", format!("cannot canonicalize document: {e}")))
}

/// SHA-256 over the concatenation of already-normalized inputs, in chain
/// order. Returns the digest in `sha256:<hex>` form.
pub fn source_hash<'a>(inputs: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input);
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
