//! Derived Kubernetes manifests: NetworkPolicies, Pod Security namespaces
//! and RBAC objects, generated from resolved Floe configuration.
//!
//! Generation is a pure function of its inputs: no cluster access, no side
//! effects, byte-identical output for identical configuration.

mod labels;
mod network_policy;
mod pod_security;
mod rbac;
mod summary;
mod validate;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Namespace, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use serde::Serialize;

use floe_compiler::SecurityConfig;

pub use labels::{DOMAIN_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SOURCE_HASH_LABEL};
pub use network_policy::{JOBS_NAMESPACE, PLATFORM_NAMESPACE};
pub use pod_security::JobsPodSecurity;
pub use validate::{validate, NetworkValidationError};

/// One emitted Kubernetes object. Wrapped so callers can write YAML per
/// `(namespace, kind)` without reflecting over arbitrary types.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GeneratedObject {
    Namespace(Namespace),
    NetworkPolicy(Box<NetworkPolicy>),
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
}

impl GeneratedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            GeneratedObject::Namespace(_) => "Namespace",
            GeneratedObject::NetworkPolicy(_) => "NetworkPolicy",
            GeneratedObject::ServiceAccount(_) => "ServiceAccount",
            GeneratedObject::Role(_) => "Role",
            GeneratedObject::RoleBinding(_) => "RoleBinding",
        }
    }

    pub fn name(&self) -> String {
        let meta = match self {
            GeneratedObject::Namespace(o) => &o.metadata,
            GeneratedObject::NetworkPolicy(o) => &o.metadata,
            GeneratedObject::ServiceAccount(o) => &o.metadata,
            GeneratedObject::Role(o) => &o.metadata,
            GeneratedObject::RoleBinding(o) => &o.metadata,
        };
        meta.name.clone().unwrap_or_default()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        let meta = match self {
            GeneratedObject::Namespace(o) => &o.metadata,
            GeneratedObject::NetworkPolicy(o) => &o.metadata,
            GeneratedObject::ServiceAccount(o) => &o.metadata,
            GeneratedObject::Role(o) => &o.metadata,
            GeneratedObject::RoleBinding(o) => &o.metadata,
        };
        meta.labels.as_ref()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Everything one generation run produces.
#[derive(Debug, Clone)]
pub struct GeneratedManifests {
    /// Objects grouped by the namespace they are scoped to.
    pub objects: BTreeMap<String, Vec<GeneratedObject>>,
    /// Hardened pod-level defaults for job pods, consumed by the deploy
    /// layer rather than applied directly.
    pub jobs_pod_security: JobsPodSecurity,
    /// Human-facing Markdown summary of what was generated.
    pub summary: String,
}

/// Derive all managed-namespace manifests from a resolved security section.
///
/// `domains` lists the domain names that get their own namespace; the
/// platform and jobs namespaces are always managed. `source_hash` is the
/// CompiledArtifacts digest the output is traced back to.
pub fn generate(
    security: &SecurityConfig,
    domains: &[String],
    source_hash: &str,
) -> GeneratedManifests {
    let mut objects: BTreeMap<String, Vec<GeneratedObject>> = BTreeMap::new();

    for class in network_policy::managed_namespaces(domains) {
        let namespace = class.namespace_name();
        let mut set = Vec::new();
        set.push(GeneratedObject::Namespace(pod_security::namespace(
            &class,
            &security.pod_security,
            source_hash,
        )));
        if security.network_policies.enabled {
            set.extend(
                network_policy::policies_for(&class, &security.network_policies, source_hash)
                    .into_iter()
                    .map(|p| GeneratedObject::NetworkPolicy(Box::new(p))),
            );
        }
        objects.insert(namespace, set);
    }

    rbac::append_rbac_objects(&mut objects, &security.rbac, source_hash);

    let jobs_pod_security = pod_security::jobs_pod_security(&security.pod_security);
    let summary = summary::render(&objects, security, domains);
    tracing::debug!(
        namespaces = objects.len(),
        policies_enabled = security.network_policies.enabled,
        "derived kubernetes manifests"
    );

    GeneratedManifests {
        objects,
        jobs_pod_security,
        summary,
    }
}
