use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::artifacts::{DeploymentMode, ManifestRef};
use crate::errors::{InheritanceError, InheritanceResult, SchemaError};
use crate::plugins::PluginCategory;
use crate::schema::{
    Document, GovernanceConfig, Manifest, ManifestScope, PlatformConfig, SecurityConfig,
};

mod merge;

/// Hard bound on how many parent manifests a chain may load.
pub const MAX_CHAIN_DEPTH: usize = 5;

#[derive(Error, Debug, Clone)]
#[error("{reason}")]
pub struct ParentLoadError {
    pub reason: String,
}

impl ParentLoadError {
    pub fn new(reason: impl Into<String>) -> Self {
        ParentLoadError {
            reason: reason.into(),
        }
    }
}

/// Fetches a parent manifest by its OCI URI. Production wires an
/// OCI-registry-backed implementation; tests use in-memory maps.
#[async_trait]
pub trait ParentLoader: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Manifest, ParentLoadError>;
}

/// Memoizing wrapper around a [`ParentLoader`].
///
/// Each reference is fetched at most once per process; concurrent resolves
/// of the same reference share one in-flight load through the per-key cell.
/// References carry name, version and optionally a digest, so a cache hit
/// can never serve the wrong manifest revision.
pub struct MemoizingLoader<L> {
    inner: L,
    cells: Mutex<HashMap<String, Arc<OnceCell<Manifest>>>>,
}

impl<L: ParentLoader> MemoizingLoader<L> {
    pub fn new(inner: L) -> Self {
        MemoizingLoader {
            inner,
            cells: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<L: ParentLoader> ParentLoader for MemoizingLoader<L> {
    async fn load(&self, reference: &str) -> Result<Manifest, ParentLoadError> {
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(reference.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| self.inner.load(reference))
            .await
            .cloned()
    }
}

/// Outcome of inheritance resolution: the fully merged platform
/// configuration, the chain it came from, and per-leaf provenance.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub merged: PlatformConfig,
    /// Root-first chain of the loaded parent manifests.
    pub chain: Vec<ManifestRef>,
    /// Leaf path -> name of the chain level that contributed the value.
    pub field_sources: BTreeMap<String, String>,
    pub mode: DeploymentMode,
    /// Name of the nearest domain manifest, when the chain has one.
    pub domain: Option<String>,
    /// Canonical bytes of every loaded parent, root first. The compiler
    /// appends the product document and hashes the concatenation.
    pub normalized_inputs: Vec<Vec<u8>>,
}

impl Resolved {
    pub fn governance(&self) -> GovernanceConfig {
        self.merged.governance.clone().unwrap_or_default()
    }

    pub fn security(&self) -> SecurityConfig {
        self.merged.security.clone().unwrap_or_default()
    }
}

/// Resolve a document against its inheritance chain.
///
/// Walks `parent` references through the injected loader, rejects cycles and
/// over-deep chains, merges every level per the field strategy table and
/// enforces the enterprise plugin whitelist.
pub async fn resolve(doc: &Document, loader: &dyn ParentLoader) -> InheritanceResult<Resolved> {
    let mut visited: HashSet<(String, String)> = HashSet::new();
    visited.insert((doc.metadata().name.clone(), doc.metadata().version.clone()));

    // child -> root, together with the URI each level was loaded from
    let mut parents: Vec<(Manifest, String)> = Vec::new();
    let mut next = doc.parent().map(str::to_string);
    while let Some(reference) = next {
        if parents.len() == MAX_CHAIN_DEPTH {
            return Err(InheritanceError::DepthExceeded {
                max: MAX_CHAIN_DEPTH,
            });
        }
        let manifest = loader.load(&reference).await.map_err(|e| {
            InheritanceError::MissingParent {
                reference: reference.clone(),
                reason: e.reason,
            }
        })?;
        let identity = (
            manifest.metadata.name.clone(),
            manifest.metadata.version.clone(),
        );
        if !visited.insert(identity.clone()) {
            return Err(InheritanceError::CircularInheritance {
                name: identity.0,
                version: identity.1,
            });
        }
        next = manifest.parent.clone();
        parents.push((manifest, reference));
    }
    parents.reverse();

    validate_chain_shape(&parents)?;

    let mut merged_value = serde_json::Value::Object(serde_json::Map::new());
    let mut field_sources = BTreeMap::new();
    for (manifest, _) in &parents {
        merge::merge_layer(
            &mut merged_value,
            &manifest.platform_value(),
            &manifest.metadata.name,
            &mut field_sources,
        )?;
    }
    merge::merge_layer(
        &mut merged_value,
        &doc.platform_value(),
        &doc.metadata().name,
        &mut field_sources,
    )?;

    enforce_plugin_whitelist(&parents, doc)?;

    let merged: PlatformConfig = serde_json::from_value(merged_value).map_err(|e| {
        InheritanceError::Schema(SchemaError::invalid(
            "",
            format!("merged configuration is not well-formed: {e}"),
        ))
    })?;

    let mode = match parents.len() {
        0 => DeploymentMode::Simple,
        1 => DeploymentMode::Centralized,
        _ => DeploymentMode::Mesh,
    };
    let domain = parents
        .iter()
        .rev()
        .find(|(m, _)| m.scope == Some(ManifestScope::Domain))
        .map(|(m, _)| m.metadata.name.clone());

    let normalized_inputs = parents
        .iter()
        .map(|(manifest, _)| {
            crate::canonical::canonical_json_bytes(manifest).map_err(|e| {
                InheritanceError::Schema(SchemaError::invalid(
                    "",
                    format!("cannot normalize {}: {e}", manifest.metadata.name),
                ))
            })
        })
        .collect::<InheritanceResult<Vec<_>>>()?;

    let chain = parents
        .iter()
        .map(|(manifest, reference)| ManifestRef {
            name: manifest.metadata.name.clone(),
            version: manifest.metadata.version.clone(),
            scope: manifest.scope.map(|s| s.as_str().to_string()),
            reference: Some(reference.clone()),
        })
        .collect();

    debug!(
        product = doc.metadata().name.as_str(),
        ?mode,
        levels = parents.len(),
        "inheritance resolved"
    );

    Ok(Resolved {
        merged,
        chain,
        field_sources,
        mode,
        domain,
        normalized_inputs,
    })
}

fn validate_chain_shape(parents: &[(Manifest, String)]) -> InheritanceResult<()> {
    match parents {
        [] => Ok(()),
        [(root, _)] => match root.scope {
            Some(ManifestScope::Domain) => Err(InheritanceError::InvalidChain {
                reason: format!(
                    "domain manifest {} cannot be the inheritance root",
                    root.metadata.name
                ),
            }),
            _ => Ok(()),
        },
        [(root, _), rest @ ..] => {
            if root.scope != Some(ManifestScope::Enterprise) {
                return Err(InheritanceError::InvalidChain {
                    reason: format!(
                        "chain root {} must be enterprise-scoped",
                        root.metadata.name
                    ),
                });
            }
            for (manifest, _) in rest {
                if manifest.scope != Some(ManifestScope::Domain) {
                    return Err(InheritanceError::InvalidChain {
                        reason: format!(
                            "intermediate manifest {} must be domain-scoped",
                            manifest.metadata.name
                        ),
                    });
                }
            }
            Ok(())
        }
    }
}

/// Every plugin selected below the enterprise level must appear in the
/// enterprise `approved_plugins` whitelist for its category. The check also
/// covers the input document itself, so a product cannot reintroduce a
/// selection its domain was never allowed to make.
fn enforce_plugin_whitelist(
    parents: &[(Manifest, String)],
    doc: &Document,
) -> InheritanceResult<()> {
    let Some((root, _)) = parents.first() else {
        return Ok(());
    };
    let Some(approved) = &root.approved_plugins else {
        return Ok(());
    };

    let mut check = |plugins: &BTreeMap<PluginCategory, crate::schema::PluginSelection>|
     -> InheritanceResult<()> {
        for (category, selection) in plugins {
            let allowed = approved.get(category);
            let approved_for_category = allowed
                .map(|names| names.contains(&selection.plugin_type))
                .unwrap_or(false);
            if !approved_for_category {
                return Err(InheritanceError::PluginNotApproved {
                    category: category.to_string(),
                    name: selection.plugin_type.clone(),
                    approved: allowed.cloned().unwrap_or_default(),
                });
            }
        }
        Ok(())
    };

    for (manifest, _) in &parents[1..] {
        check(&manifest.platform.plugins)?;
    }
    check(&doc.platform().plugins)
}
