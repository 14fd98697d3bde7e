use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{SchemaError, SchemaResult};
use crate::plugins::PluginCategory;

mod validation;

pub use validation::{parse_document, NAME_PATTERN, SECRET_NAME_PATTERN};

/// The only apiVersion this tool compiles.
pub const API_VERSION: &str = "floe.dev/v1alpha1";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Manifest,
    DataProduct,
}

/// Placement of a platform manifest inside an inheritance hierarchy.
///
/// An absent scope means 2-tier mode: a standalone platform manifest with no
/// parent and no children of its own.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManifestScope {
    Enterprise,
    Domain,
}

impl ManifestScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestScope::Enterprise => "enterprise",
            ManifestScope::Domain => "domain",
        }
    }
}

/// Identifying metadata shared by platform manifests and data products.
///
/// ```yaml
/// metadata:
///   name: acme-analytics
///   version: 1.4.0
///   owner: analytics-platform@acme.dev
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct Metadata {
    /// DNS-label style name, 3 to 63 characters.
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    /// Semantic version of this document, not of the tool.
    #[validate(custom = "validation::validate_semver")]
    pub version: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where a secret value lives. Secrets are carried by reference only and are
/// never dereferenced at compile time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SecretSource {
    Env,
    Kubernetes,
    Vault,
    ExternalSecrets,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct SecretReference {
    pub source: SecretSource,
    #[validate(custom = "validation::validate_secret_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// One selected plugin implementation for a category.
///
/// `config` is opaque to the compiler; it is carried through to the artifact
/// and interpreted by the plugin itself at deploy time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
pub struct PluginSelection {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate]
    pub connection_secret_ref: Option<SecretReference>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PiiEncryption {
    Optional,
    Required,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AuditLogging {
    Disabled,
    Enabled,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Off,
    Warn,
    Strict,
}

/// Governance posture. The first three fields are monotone: a child manifest
/// may keep or strengthen what its parent demands, never weaken it.
/// `data_retention_days` merges as max(parent, child).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GovernanceConfig {
    pub pii_encryption: PiiEncryption,
    pub audit_logging: AuditLogging,
    pub policy_enforcement_level: EnforcementLevel,
    pub data_retention_days: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        // Weakest-of-each: an absent field never out-ranks a parent value.
        GovernanceConfig {
            pii_encryption: PiiEncryption::Optional,
            audit_logging: AuditLogging::Disabled,
            policy_enforcement_level: EnforcementLevel::Off,
            data_retention_days: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceIsolation {
    Strict,
    Permissive,
}

/// Pod Security Standards admission level.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PssLevel {
    Privileged,
    Baseline,
    Restricted,
}

impl PssLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PssLevel::Privileged => "privileged",
            PssLevel::Baseline => "baseline",
            PssLevel::Restricted => "restricted",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Validate)]
#[serde(default)]
pub struct PodSecurityConfig {
    /// Enforced PSS level. When unset the generator picks `restricted` for
    /// jobs namespaces and `baseline` for the platform namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enforce: Option<PssLevel>,
    /// Paths that job pods may write to; each becomes an emptyDir mount on
    /// top of the read-only root filesystem.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub writable_paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressProtocol {
    TCP,
    UDP,
}

/// Destination of an egress allow rule: exactly one of the two variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressTarget {
    Namespace(String),
    Cidr(String),
}

/// User-supplied egress opening, added on top of the built-in allow set.
///
/// ```yaml
/// - name: warehouse
///   to_cidr: 10.12.0.0/16
///   port: 5432
///   protocol: TCP
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
#[validate(schema(function = "validation::validate_egress_target"))]
pub struct EgressAllowRule {
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_cidr: Option<String>,
    #[validate(range(min = 1))]
    pub port: u16,
    pub protocol: EgressProtocol,
}

impl EgressAllowRule {
    pub fn target(&self) -> EgressTarget {
        match (&self.to_namespace, &self.to_cidr) {
            (Some(ns), _) => EgressTarget::Namespace(ns.clone()),
            (None, Some(cidr)) => EgressTarget::Cidr(cidr.clone()),
            // validated at parse time
            (None, None) => unreachable!("egress rule without target survived validation"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
#[serde(default)]
pub struct NetworkPoliciesConfig {
    pub enabled: bool,
    pub default_deny: bool,
    pub allow_external_https: bool,
    pub ingress_controller_namespace: String,
    #[validate]
    pub jobs_egress_allow: Vec<EgressAllowRule>,
    #[validate]
    pub platform_egress_allow: Vec<EgressAllowRule>,
}

impl Default for NetworkPoliciesConfig {
    fn default() -> Self {
        NetworkPoliciesConfig {
            enabled: false,
            default_deny: true,
            allow_external_https: false,
            ingress_controller_namespace: "ingress-nginx".to_string(),
            jobs_egress_allow: Vec::new(),
            platform_egress_allow: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct RbacRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct RbacRole {
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    #[validate(custom = "validation::validate_name")]
    pub service_account: String,
    #[validate]
    pub rules: Vec<RbacRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default, Validate)]
#[serde(default)]
pub struct RbacConfig {
    pub create_service_accounts: bool,
    #[validate]
    pub roles: Vec<RbacRole>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
#[serde(default)]
pub struct SecurityConfig {
    #[validate]
    pub rbac: RbacConfig,
    #[validate]
    pub pod_security: PodSecurityConfig,
    pub namespace_isolation: NamespaceIsolation,
    #[validate]
    pub network_policies: NetworkPoliciesConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            rbac: RbacConfig::default(),
            pod_security: PodSecurityConfig::default(),
            namespace_isolation: NamespaceIsolation::Strict,
            network_policies: NetworkPoliciesConfig::default(),
        }
    }
}

/// The platform-shaped subset shared by manifests and data products. This is
/// the part the inheritance resolver merges; everything else on a document is
/// either identity or product-local.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default, Validate)]
pub struct PlatformConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<PluginCategory, PluginSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate]
    pub security: Option<SecurityConfig>,
}

/// Platform-level configuration document, enterprise or domain scoped (or
/// scope-less in 2-tier mode).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
pub struct Manifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: ManifestKind,
    #[validate]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ManifestScope>,
    /// OCI URI of the parent manifest. Present iff `scope: domain`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    #[validate]
    pub platform: PlatformConfig,
    /// Per-category whitelist of plugin types domains may select.
    /// Enterprise scope only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_plugins: Option<BTreeMap<PluginCategory, Vec<String>>>,
    /// Product identifiers this domain owns. Domain scope only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_products: Option<Vec<String>>,
    /// Non-fatal findings recorded while parsing, e.g. unknown fields
    /// outside the security-sensitive sections.
    #[serde(skip)]
    pub warnings: Vec<String>,
    /// The platform subtree exactly as the author wrote it. The resolver
    /// merges this instead of the typed view so that struct defaults never
    /// masquerade as explicit child overrides.
    #[serde(skip)]
    pub raw_platform: serde_json::Value,
}

/// One transformation step of a data product. `compute: ~` binds the
/// transform to the registry default at compile time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
pub struct Transform {
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct OutputPort {
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Validate)]
pub struct InputPort {
    #[validate(custom = "validation::validate_name")]
    pub name: String,
    /// `domain.product` identifier of the upstream output port owner.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Deployable unit configuration: transforms, schedule and ports, plus the
/// same platform-shaped overrides a manifest carries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Validate)]
pub struct DataProduct {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: ManifestKind,
    #[validate]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(flatten)]
    #[validate]
    pub platform: PlatformConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate]
    pub transforms: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate]
    pub output_ports: Option<Vec<OutputPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate]
    pub input_ports: Option<Vec<InputPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_contracts: Option<Vec<serde_json::Value>>,
    #[serde(skip)]
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub raw_platform: serde_json::Value,
}

/// A parsed configuration document of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Manifest(Manifest),
    DataProduct(DataProduct),
}

impl Document {
    pub fn metadata(&self) -> &Metadata {
        match self {
            Document::Manifest(m) => &m.metadata,
            Document::DataProduct(p) => &p.metadata,
        }
    }

    pub fn parent(&self) -> Option<&str> {
        match self {
            Document::Manifest(m) => m.parent.as_deref(),
            Document::DataProduct(p) => p.parent.as_deref(),
        }
    }

    pub fn platform(&self) -> &PlatformConfig {
        match self {
            Document::Manifest(m) => &m.platform,
            Document::DataProduct(p) => &p.platform,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Document::Manifest(m) => &m.warnings,
            Document::DataProduct(p) => &p.warnings,
        }
    }

    /// The author-written platform subtree, for layer merging.
    pub fn platform_value(&self) -> serde_json::Value {
        match self {
            Document::Manifest(m) => m.platform_value(),
            Document::DataProduct(p) => p.platform_value(),
        }
    }
}

impl Manifest {
    /// Structural checks that cannot be expressed as per-field validators:
    /// the scope/parent invariants and the scope-conditional whitelists.
    pub(crate) fn validate_scope_rules(&self) -> SchemaResult<()> {
        match self.scope {
            Some(ManifestScope::Enterprise) => {
                if self.parent.is_some() {
                    return Err(SchemaError::invalid(
                        "parent",
                        "an enterprise manifest is the inheritance root and cannot have a parent",
                    ));
                }
                if self.approved_products.is_some() {
                    return Err(SchemaError::invalid(
                        "approved_products",
                        "only domain manifests list approved products",
                    ));
                }
            }
            Some(ManifestScope::Domain) => {
                if self.parent.is_none() {
                    return Err(SchemaError::invalid(
                        "parent",
                        "a domain manifest must reference its enterprise parent",
                    ));
                }
                if self.approved_plugins.is_some() {
                    return Err(SchemaError::invalid(
                        "approved_plugins",
                        "only enterprise manifests carry a plugin whitelist",
                    ));
                }
            }
            None => {
                if self.parent.is_some() {
                    return Err(SchemaError::invalid(
                        "parent",
                        "a scope-less manifest runs in 2-tier mode and cannot have a parent",
                    ));
                }
                if self.approved_plugins.is_some() || self.approved_products.is_some() {
                    return Err(SchemaError::invalid(
                        "scope",
                        "approved_plugins/approved_products require an explicit scope",
                    ));
                }
            }
        }
        if let Some(parent) = &self.parent {
            validation::validate_parent_uri(parent)?;
        }
        Ok(())
    }

    /// The author-written platform subtree, for layer merging. Falls back to
    /// the typed view for manifests that were built programmatically.
    pub fn platform_value(&self) -> serde_json::Value {
        if self.raw_platform.is_null() {
            serde_json::to_value(&self.platform).unwrap_or_default()
        } else {
            self.raw_platform.clone()
        }
    }
}

impl DataProduct {
    pub fn platform_value(&self) -> serde_json::Value {
        if self.raw_platform.is_null() {
            serde_json::to_value(&self.platform).unwrap_or_default()
        } else {
            self.raw_platform.clone()
        }
    }

    /// Dotted product identifier, qualified by the owning domain when the
    /// product lives in a mesh.
    pub fn product_id(&self, domain: Option<&str>) -> String {
        match domain {
            Some(domain) => format!("{}.{}", domain, self.metadata.name),
            None => self.metadata.name.clone(),
        }
    }
}
