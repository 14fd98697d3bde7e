use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::errors::UnknownPluginError;

/// The plugin categories a platform manifest can select implementations for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Compute,
    Orchestrator,
    Catalog,
    Storage,
    SemanticLayer,
    Ingestion,
    Secrets,
    Observability,
    Identity,
    Dbt,
    Quality,
}

impl PluginCategory {
    pub const ALL: [PluginCategory; 11] = [
        PluginCategory::Compute,
        PluginCategory::Orchestrator,
        PluginCategory::Catalog,
        PluginCategory::Storage,
        PluginCategory::SemanticLayer,
        PluginCategory::Ingestion,
        PluginCategory::Secrets,
        PluginCategory::Observability,
        PluginCategory::Identity,
        PluginCategory::Dbt,
        PluginCategory::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginCategory::Compute => "compute",
            PluginCategory::Orchestrator => "orchestrator",
            PluginCategory::Catalog => "catalog",
            PluginCategory::Storage => "storage",
            PluginCategory::SemanticLayer => "semantic_layer",
            PluginCategory::Ingestion => "ingestion",
            PluginCategory::Secrets => "secrets",
            PluginCategory::Observability => "observability",
            PluginCategory::Identity => "identity",
            PluginCategory::Dbt => "dbt",
            PluginCategory::Quality => "quality",
        }
    }
}

impl std::fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a discovered plugin implementation. The compiler never
/// looks inside; downstream layers use it to instantiate the plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginHandle {
    pub category: PluginCategory,
    pub name: String,
}

/// Process-local index of plugin implementations, keyed by category.
///
/// The index is populated once at startup from the discovery sources and is
/// read-only afterwards; `plugin_registry()` hands out the shared instance.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    index: BTreeMap<PluginCategory, BTreeSet<String>>,
}

// Implementations shipped with the distribution. Third-party plugins are
// appended at discovery time through the FLOE_PLUGIN_PATH scan.
const BUILTIN_PLUGINS: &[(PluginCategory, &[&str])] = &[
    (PluginCategory::Compute, &["duckdb", "spark"]),
    (PluginCategory::Orchestrator, &["dagster"]),
    (PluginCategory::Catalog, &["polaris"]),
    (PluginCategory::Storage, &["s3", "minio"]),
    (PluginCategory::SemanticLayer, &["cube"]),
    (PluginCategory::Ingestion, &["dlt", "airbyte"]),
    (
        PluginCategory::Secrets,
        &["env", "kubernetes", "vault", "external-secrets"],
    ),
    (PluginCategory::Observability, &["otel"]),
    (PluginCategory::Identity, &["oidc"]),
    (PluginCategory::Dbt, &["dbt-core"]),
    (PluginCategory::Quality, &["soda", "great-expectations"]),
];

impl PluginRegistry {
    /// Scan the discovery sources and build the index.
    pub fn discover() -> Self {
        let mut registry = PluginRegistry::default();
        for (category, names) in BUILTIN_PLUGINS {
            for name in names.iter() {
                registry.register(*category, *name);
            }
        }
        if let Ok(extra) = std::env::var("FLOE_PLUGIN_PATH") {
            registry.scan_plugin_path(&extra);
        }
        registry
    }

    /// Build a registry from explicit entries. Test seam.
    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PluginCategory, S)>,
        S: Into<String>,
    {
        let mut registry = PluginRegistry::default();
        for (category, name) in entries {
            registry.register(category, name);
        }
        registry
    }

    fn register(&mut self, category: PluginCategory, name: impl Into<String>) {
        self.index.entry(category).or_default().insert(name.into());
    }

    // Entries look like `compute:duckdb-enterprise,quality:monte-carlo`.
    fn scan_plugin_path(&mut self, spec: &str) {
        for entry in spec.split(',').filter(|e| !e.trim().is_empty()) {
            match entry.trim().split_once(':') {
                Some((category, name)) => {
                    match serde_yaml::from_str::<PluginCategory>(category.trim()) {
                        Ok(category) => self.register(category, name.trim()),
                        Err(_) => {
                            tracing::warn!(entry, "ignoring plugin with unknown category")
                        }
                    }
                }
                None => tracing::warn!(entry, "ignoring malformed FLOE_PLUGIN_PATH entry"),
            }
        }
    }

    pub fn list_available(&self, category: PluginCategory) -> Vec<String> {
        self.index
            .get(&category)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn validate(&self, category: PluginCategory, name: &str) -> Result<(), UnknownPluginError> {
        let known = self
            .index
            .get(&category)
            .map(|names| names.contains(name))
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(UnknownPluginError {
                category: category.to_string(),
                name: name.to_string(),
                available: self.list_available(category),
            })
        }
    }

    pub fn get(&self, category: PluginCategory, name: &str) -> Result<PluginHandle, UnknownPluginError> {
        self.validate(category, name)?;
        Ok(PluginHandle {
            category,
            name: name.to_string(),
        })
    }
}

lazy_static! {
    static ref REGISTRY: PluginRegistry = PluginRegistry::discover();
}

/// The process-wide registry, initialized on first use and read-only after.
pub fn plugin_registry() -> &'static PluginRegistry {
    &REGISTRY
}
