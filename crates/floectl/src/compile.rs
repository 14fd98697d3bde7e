use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::ArgMatches;
use tracing::{debug, info, warn};

use artifact_client::Registry;
use floe_compiler::{
    compile, parse_document, plugin_registry, resolve, CompiledArtifacts, DataProduct, Document,
    Identity, MemoizingLoader, Resolved,
};

use crate::backend::OciManifestLoader;
use crate::errors::CliError;

/// Locate the DataProduct manifest in a directory: `product.yaml` first,
/// then any YAML document with `kind: DataProduct`.
pub(crate) fn find_product(manifest_dir: &Path) -> Result<DataProduct, CliError> {
    let preferred = manifest_dir.join("product.yaml");
    let mut candidates: Vec<PathBuf> = if preferred.exists() {
        vec![preferred]
    } else {
        let mut yaml_files: Vec<PathBuf> = std::fs::read_dir(manifest_dir)
            .map_err(|e| {
                anyhow::anyhow!("cannot read manifest dir {}: {e}", manifest_dir.display())
            })?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        yaml_files.sort();
        yaml_files
    };

    for path in candidates.drain(..) {
        let bytes = std::fs::read(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        match parse_document(&bytes) {
            Ok(Document::DataProduct(product)) => {
                for warning in &product.warnings {
                    warn!(file = %path.display(), "{warning}");
                }
                debug!(file = %path.display(), "data product manifest found");
                return Ok(product);
            }
            Ok(Document::Manifest(_)) => continue,
            Err(error) => return Err(error.into()),
        }
    }
    Err(anyhow::anyhow!(
        "no DataProduct manifest found in {}",
        manifest_dir.display()
    )
    .into())
}

/// The full schema → resolve → compile pipeline for a manifest directory.
pub(crate) async fn compile_dir(
    manifest_dir: &Path,
    registry: Registry,
) -> Result<(CompiledArtifacts, Resolved, DataProduct), CliError> {
    let product = find_product(manifest_dir)?;
    let loader = MemoizingLoader::new(OciManifestLoader::new(registry));
    let doc = Document::DataProduct(product.clone());
    let resolved = resolve(&doc, &loader).await?;
    let identity = Identity {
        product_id: product.product_id(resolved.domain.as_deref()),
    };
    let artifacts = compile(
        &resolved,
        &product,
        identity,
        Utc::now(),
        plugin_registry(),
    )?;
    Ok((artifacts, resolved, product))
}

pub(crate) async fn run(matches: &ArgMatches) -> Result<(), CliError> {
    let manifest_dir = PathBuf::from(
        matches
            .get_one::<String>("manifest-dir")
            .expect("manifest-dir is required"),
    );
    if let Some(env) = matches.get_one::<String>("env") {
        // the artifact is environment-independent; enforcement happens at pull
        debug!(env = env.as_str(), "compiling (output does not depend on the environment)");
    }

    let registry = crate::backend::registry(matches)?;
    let (artifacts, resolved, _) = compile_dir(&manifest_dir, registry).await?;

    let output = matches
        .get_one::<String>("output")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("target/compiled-artifacts.json"));
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
    }
    let bytes = artifacts
        .to_canonical_json()
        .map_err(floe_compiler::errors::CompilationError::Serialize)?;
    std::fs::write(&output, bytes)
        .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", output.display()))?;

    info!(
        product = artifacts.identity.product_id.as_str(),
        mode = ?artifacts.mode,
        levels = resolved.chain.len(),
        source_hash = artifacts.metadata.source_hash.as_str(),
        output = %output.display(),
        "compilation finished"
    );
    println!(
        "Compiled {} ({:?} mode) -> {}",
        artifacts.identity.product_id,
        artifacts.mode,
        output.display()
    );
    Ok(())
}
