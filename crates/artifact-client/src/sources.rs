use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{RegistryError, RegistryResult};

/// Per-host connection overrides: plain-HTTP registries and custom
/// certificate authorities.
///
/// ```yaml
/// insecure_sources:
///   - registry.local.lan:5000
/// source_authorities:
///   registry.acme.dev:
///     ca_path: /etc/floe/acme-ca.pem
/// ```
#[derive(Default, Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Sources {
    insecure_sources: HashSet<String>,
    source_authorities: HashMap<String, CertificateAuthority>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct CertificateAuthority {
    ca_path: PathBuf,
}

impl Sources {
    pub fn is_insecure_source(&self, host: &str) -> bool {
        self.insecure_sources.contains(host)
    }

    /// PEM bytes of the custom CA configured for a host, if any.
    pub fn source_authority_pem(&self, host: &str) -> Option<Vec<u8>> {
        self.source_authorities
            .get(host)
            .and_then(|authority| std::fs::read(&authority.ca_path).ok())
    }
}

pub fn read_sources_file(path: &Path) -> RegistryResult<Sources> {
    serde_yaml::from_reader(File::open(path)?).map_err(|e| RegistryError::Malformed {
        reference: path.display().to_string(),
        reason: format!("not a sources file: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn insecure_hosts_are_matched_exactly() {
        let sources: Sources = serde_yaml::from_str(
            "insecure_sources:\n  - registry.local.lan:5000\n",
        )
        .unwrap();
        assert!(sources.is_insecure_source("registry.local.lan:5000"));
        assert!(!sources.is_insecure_source("registry.local.lan"));
    }

    #[test]
    fn authority_pem_is_read_from_disk() {
        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file.write_all(b"-----BEGIN CERTIFICATE-----\n").unwrap();
        let yaml = format!(
            "source_authorities:\n  registry.acme.dev:\n    ca_path: {}\n",
            ca_file.path().display()
        );
        let sources: Sources = serde_yaml::from_str(&yaml).unwrap();
        assert!(sources
            .source_authority_pem("registry.acme.dev")
            .unwrap()
            .starts_with(b"-----BEGIN"));
        assert!(sources.source_authority_pem("registry.other.dev").is_none());
    }
}
