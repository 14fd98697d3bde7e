//! Compilation core: parse layered platform manifests, resolve inheritance,
//! and assemble immutable [`CompiledArtifacts`].

mod artifacts;
mod canonical;
mod compiler;
pub mod errors;
mod plugins;
mod resolver;
mod schema;

pub use artifacts::{
    ArtifactMetadata, CompiledArtifacts, ComputeConfig, ComputeRegistry, DeploymentMode, Identity,
    ManifestRef, Observability, PluginRecord, ResolvedPlugins, COMPILED_ARTIFACTS_VERSION,
};
pub use canonical::{canonical_json_bytes, normalize_document, source_hash};
pub use compiler::{compile, TOOL_VERSION};
pub use plugins::{plugin_registry, PluginCategory, PluginHandle, PluginRegistry};
pub use resolver::{
    resolve, MemoizingLoader, ParentLoadError, ParentLoader, Resolved, MAX_CHAIN_DEPTH,
};
pub use schema::{
    parse_document, AuditLogging, DataProduct, Document, EgressAllowRule, EgressProtocol,
    EgressTarget, EnforcementLevel, GovernanceConfig, InputPort, Manifest, ManifestKind,
    ManifestScope, Metadata, NamespaceIsolation, NetworkPoliciesConfig, OutputPort, PiiEncryption,
    PlatformConfig, PluginSelection, PodSecurityConfig, PssLevel, RbacConfig, RbacRole, RbacRule,
    Schedule, SecretReference, SecretSource, SecurityConfig, Transform, API_VERSION, NAME_PATTERN,
    SECRET_NAME_PATTERN,
};
