use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::ArgMatches;
use directories::ProjectDirs;
use tracing::{debug, warn};

use artifact_client::{
    read_docker_config_json_file, read_policy_file, read_sources_file, AuditSink, DockerConfig,
    OciBackend, Registry, RekorRestClient, Sources, VerificationPolicy, Verifier,
};
use floe_compiler::{parse_document, Document, Manifest, ParentLoadError, ParentLoader};

use crate::errors::CliError;

fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("dev", "floe", "floe").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Registry connection options shared by every remote command: explicit
/// paths win, then the default config locations, then nothing.
pub(crate) fn remote_options(
    matches: &ArgMatches,
) -> Result<(Option<Sources>, Option<DockerConfig>), CliError> {
    let sources = if let Some(path) = matches.get_one::<String>("sources-path") {
        Some(read_sources_file(Path::new(path))?)
    } else {
        let default = config_dir().map(|dir| dir.join("sources.yaml"));
        match default {
            Some(path) if path.exists() => Some(read_sources_file(&path)?),
            _ => None,
        }
    };

    let docker_config = if let Some(path) = matches.get_one::<String>("docker-config-json-path") {
        Some(read_docker_config_json_file(Path::new(path))?)
    } else {
        let default = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".docker").join("config.json"));
        match default {
            Some(path) if path.exists() => Some(read_docker_config_json_file(&path)?),
            _ => None,
        }
    };

    Ok((sources, docker_config))
}

pub(crate) fn registry(matches: &ArgMatches) -> Result<Registry, CliError> {
    let (sources, docker_config) = remote_options(matches)?;
    Ok(Registry::new(Arc::new(OciBackend::new(
        docker_config,
        sources,
    ))))
}

/// Online verifier wired to the public transparency log.
pub(crate) fn verifier() -> Result<Verifier, CliError> {
    let rekor = RekorRestClient::public_good()?;
    Ok(Verifier::new(
        Some(Arc::new(rekor)),
        Arc::new(AuditSink::new()),
    ))
}

/// The policy given on the command line, or the one in the user config
/// directory, or a warn-only default.
pub(crate) fn verification_policy(
    matches: &ArgMatches,
) -> Result<VerificationPolicy, CliError> {
    if let Some(path) = matches.get_one::<String>("policy") {
        return Ok(read_policy_file(Path::new(path))?);
    }
    if let Some(path) = config_dir().map(|dir| dir.join("verification-policy.yaml")) {
        if path.exists() {
            debug!(path = %path.display(), "using verification policy from the config directory");
            return Ok(read_policy_file(&path)?);
        }
    }
    warn!("no verification policy configured, defaulting to enabled + warn");
    Ok(VerificationPolicy {
        enabled: true,
        enforcement: artifact_client::EnforcementMode::Warn,
        ..Default::default()
    })
}

/// Parent manifests are OCI artifacts whose first layer is the manifest
/// YAML; the resolver walks them through this loader.
pub(crate) struct OciManifestLoader {
    registry: Registry,
}

impl OciManifestLoader {
    pub(crate) fn new(registry: Registry) -> Self {
        OciManifestLoader { registry }
    }
}

#[async_trait]
impl ParentLoader for OciManifestLoader {
    async fn load(&self, reference: &str) -> Result<Manifest, ParentLoadError> {
        let bytes = self
            .registry
            .pull_layer_bytes(reference)
            .await
            .map_err(|e| ParentLoadError::new(e.to_string()))?;
        match parse_document(&bytes).map_err(|e| ParentLoadError::new(e.to_string()))? {
            Document::Manifest(manifest) => Ok(manifest),
            Document::DataProduct(_) => Err(ParentLoadError::new(format!(
                "{reference} is a DataProduct, parents must be platform manifests"
            ))),
        }
    }
}
