use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::artifacts::{
    ArtifactMetadata, CompiledArtifacts, ComputeConfig, ComputeRegistry, DeploymentMode, Identity,
    Observability, PluginRecord, ResolvedPlugins, COMPILED_ARTIFACTS_VERSION,
};
use crate::canonical::{canonical_json_bytes, source_hash};
use crate::errors::{CompilationError, CompilationResult};
use crate::plugins::{PluginCategory, PluginRegistry};
use crate::resolver::Resolved;
use crate::schema::{DataProduct, Transform};

/// Version stamped into `metadata.tool_version`.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assemble the immutable artifact from a resolved configuration.
///
/// Deterministic and single-threaded: identical inputs (including
/// `compiled_at`) produce identical canonical bytes. Any failure is fatal;
/// no partial artifact is ever returned.
pub fn compile(
    resolved: &Resolved,
    product: &DataProduct,
    identity: Identity,
    compiled_at: DateTime<Utc>,
    registry: &PluginRegistry,
) -> CompilationResult<CompiledArtifacts> {
    let product_bytes = canonical_json_bytes(product)?;
    let hash = source_hash(
        resolved
            .normalized_inputs
            .iter()
            .map(Vec::as_slice)
            .chain([product_bytes.as_slice()]),
    );

    for (category, selection) in &resolved.merged.plugins {
        registry.validate(*category, &selection.plugin_type)?;
    }

    let compute_registry = build_compute_registry(resolved)?;
    let transforms = bind_transforms(&product.transforms, &compute_registry)?;

    let selections: BTreeMap<String, PluginRecord> = resolved
        .merged
        .plugins
        .iter()
        .map(|(category, selection)| {
            (
                category.to_string(),
                PluginRecord {
                    plugin_type: selection.plugin_type.clone(),
                    config: selection.config.clone(),
                    connection_secret_ref: selection.connection_secret_ref.clone(),
                },
            )
        })
        .collect();

    let dbt = resolved
        .merged
        .plugins
        .get(&PluginCategory::Dbt)
        .map(|selection| serde_json::Value::Object(selection.config.clone()));

    let namespace = match resolved.mode {
        DeploymentMode::Mesh => identity.product_id.clone(),
        _ => product.metadata.name.clone(),
    };

    let mesh = resolved.mode == DeploymentMode::Mesh;
    let artifacts = CompiledArtifacts {
        version: COMPILED_ARTIFACTS_VERSION.to_string(),
        metadata: ArtifactMetadata {
            compiled_at,
            tool_version: TOOL_VERSION.to_string(),
            source_hash: hash,
            product_name: product.metadata.name.clone(),
            product_version: product.metadata.version.clone(),
        },
        identity,
        mode: resolved.mode,
        inheritance_chain: resolved.chain.clone(),
        plugins: ResolvedPlugins {
            compute_registry,
            selections,
        },
        transforms,
        schedule: product.schedule.clone(),
        dbt,
        governance: resolved.governance(),
        observability: Observability { namespace },
        output_ports: mesh.then(|| product.output_ports.clone()).flatten(),
        input_ports: mesh.then(|| product.input_ports.clone()).flatten(),
        data_contracts: mesh.then(|| product.data_contracts.clone()).flatten(),
    };

    debug!(
        product = artifacts.metadata.product_name.as_str(),
        source_hash = artifacts.metadata.source_hash.as_str(),
        "compiled artifacts assembled"
    );
    Ok(artifacts)
}

fn build_compute_registry(resolved: &Resolved) -> CompilationResult<ComputeRegistry> {
    let Some(selection) = resolved.merged.plugins.get(&PluginCategory::Compute) else {
        return Err(CompilationError::Invariant {
            path: "plugins.compute".to_string(),
            reason: "no compute plugin selected anywhere in the chain".to_string(),
            hint: "select plugins.compute in the product or a parent manifest".to_string(),
        });
    };

    let configs = BTreeMap::from([(
        selection.plugin_type.clone(),
        ComputeConfig {
            engine: selection.plugin_type.clone(),
            config: selection.config.clone(),
            connection_secret_ref: selection.connection_secret_ref.clone(),
        },
    )]);
    let registry = ComputeRegistry {
        default: selection.plugin_type.clone(),
        configs,
    };
    if !registry.configs.contains_key(&registry.default) {
        return Err(CompilationError::UnknownComputeDefault {
            default: registry.default.clone(),
            configs: registry.configs.keys().cloned().collect(),
        });
    }
    Ok(registry)
}

/// Give every transform an explicit compute binding. A null binding means
/// "use the registry default".
fn bind_transforms(
    transforms: &[Transform],
    registry: &ComputeRegistry,
) -> CompilationResult<Vec<Transform>> {
    transforms
        .iter()
        .map(|transform| {
            let compute = match &transform.compute {
                Some(compute) => {
                    if !registry.configs.contains_key(compute) {
                        return Err(CompilationError::UnknownTransformCompute {
                            transform: transform.name.clone(),
                            compute: compute.clone(),
                        });
                    }
                    compute.clone()
                }
                None => {
                    if registry.default.is_empty() {
                        return Err(CompilationError::NoDefaultCompute {
                            transform: transform.name.clone(),
                        });
                    }
                    registry.default.clone()
                }
            };
            Ok(Transform {
                compute: Some(compute),
                ..transform.clone()
            })
        })
        .collect()
}
