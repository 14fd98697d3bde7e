use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use floe_compiler::{EgressAllowRule, EgressProtocol, EgressTarget, NetworkPoliciesConfig};

use crate::labels::base_labels;

pub const PLATFORM_NAMESPACE: &str = "floe-platform";
pub const JOBS_NAMESPACE: &str = "floe-jobs";

/// The namespaces Floe manages: platform, jobs, and one per domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NamespaceClass {
    Platform,
    Jobs,
    Domain(String),
}

impl NamespaceClass {
    pub(crate) fn namespace_name(&self) -> String {
        match self {
            NamespaceClass::Platform => PLATFORM_NAMESPACE.to_string(),
            NamespaceClass::Jobs => JOBS_NAMESPACE.to_string(),
            NamespaceClass::Domain(name) => format!("floe-domain-{name}"),
        }
    }

    pub(crate) fn domain(&self) -> Option<&str> {
        match self {
            NamespaceClass::Domain(name) => Some(name),
            _ => None,
        }
    }

    /// Domain namespaces run product jobs and share the jobs egress profile.
    fn runs_jobs(&self) -> bool {
        !matches!(self, NamespaceClass::Platform)
    }
}

pub(crate) fn managed_namespaces(domains: &[String]) -> Vec<NamespaceClass> {
    let mut namespaces = vec![NamespaceClass::Platform, NamespaceClass::Jobs];
    namespaces.extend(domains.iter().cloned().map(NamespaceClass::Domain));
    namespaces
}

/// All NetworkPolicies for one managed namespace: default-deny, the
/// unconditional DNS opening, the aggregated egress allows, and (for the
/// platform namespace) the ingress allows.
pub(crate) fn policies_for(
    class: &NamespaceClass,
    config: &NetworkPoliciesConfig,
    source_hash: &str,
) -> Vec<NetworkPolicy> {
    let mut policies = Vec::new();
    if config.default_deny {
        policies.push(default_deny(class, source_hash));
    }
    policies.push(dns_egress(class, source_hash));
    policies.push(egress_allow(class, config, source_hash));
    if *class == NamespaceClass::Platform {
        policies.push(platform_ingress(config, source_hash));
    }
    policies
}

fn metadata(name: &str, class: &NamespaceClass, source_hash: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(class.namespace_name()),
        labels: Some(base_labels(source_hash, class.domain())),
        ..Default::default()
    }
}

/// Empty pod selector, both policy types, no allow rules: nothing moves
/// unless another policy opens it.
fn default_deny(class: &NamespaceClass, source_hash: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: metadata("default-deny", class, source_hash),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector::default()),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ..Default::default()
        }),
    }
}

/// UDP/53 to kube-system. Emitted for every managed namespace and not
/// configurable: a default-deny namespace without DNS resolves nothing and
/// every workload breaks in confusing ways.
fn dns_egress(class: &NamespaceClass, source_hash: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: metadata("allow-dns-egress", class, source_hash),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector::default()),
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(vec![NetworkPolicyEgressRule {
                to: Some(vec![namespace_peer("kube-system")]),
                ports: Some(vec![NetworkPolicyPort {
                    port: Some(IntOrString::Int(53)),
                    protocol: Some("UDP".to_string()),
                    end_port: None,
                }]),
            }]),
            ..Default::default()
        }),
    }
}

// Platform services job pods always need to reach.
const JOBS_BUILTIN_EGRESS: &[(&str, u16)] = &[
    ("polaris", 8181),
    ("otel-grpc", 4317),
    ("otel-http", 4318),
    ("object-store", 9000),
];

fn egress_allow(
    class: &NamespaceClass,
    config: &NetworkPoliciesConfig,
    source_hash: &str,
) -> NetworkPolicy {
    let mut rules: Vec<(EgressTarget, EgressProtocol, u16)> = Vec::new();

    if class.runs_jobs() {
        for (_, port) in JOBS_BUILTIN_EGRESS {
            rules.push((
                EgressTarget::Namespace(PLATFORM_NAMESPACE.to_string()),
                EgressProtocol::TCP,
                *port,
            ));
        }
        if config.allow_external_https {
            rules.push((
                EgressTarget::Cidr("0.0.0.0/0".to_string()),
                EgressProtocol::TCP,
                443,
            ));
        }
    }

    let user_rules: &[EgressAllowRule] = if class.runs_jobs() {
        &config.jobs_egress_allow
    } else {
        &config.platform_egress_allow
    };
    for rule in user_rules {
        rules.push((rule.target(), rule.protocol, rule.port));
    }

    NetworkPolicy {
        metadata: metadata("allow-egress", class, source_hash),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector::default()),
            policy_types: Some(vec!["Egress".to_string()]),
            egress: Some(coalesce_egress(rules)),
            ..Default::default()
        }),
    }
}

/// Collapse openings that share `(target, protocol)` into one rule with a
/// port list. Target order follows first appearance; ports are sorted and
/// deduplicated.
fn coalesce_egress(rules: Vec<(EgressTarget, EgressProtocol, u16)>) -> Vec<NetworkPolicyEgressRule> {
    let mut order: Vec<(EgressTarget, EgressProtocol)> = Vec::new();
    let mut ports_by_key: BTreeMap<usize, Vec<u16>> = BTreeMap::new();

    for (target, protocol, port) in rules {
        let key = (target, protocol);
        let index = match order.iter().position(|existing| *existing == key) {
            Some(index) => index,
            None => {
                order.push(key);
                order.len() - 1
            }
        };
        let ports = ports_by_key.entry(index).or_default();
        if !ports.contains(&port) {
            ports.push(port);
        }
    }

    order
        .into_iter()
        .enumerate()
        .map(|(index, (target, protocol))| {
            let mut ports = ports_by_key.remove(&index).unwrap_or_default();
            ports.sort_unstable();
            let protocol = match protocol {
                EgressProtocol::TCP => "TCP",
                EgressProtocol::UDP => "UDP",
            };
            NetworkPolicyEgressRule {
                to: Some(vec![peer_for(&target)]),
                ports: Some(
                    ports
                        .into_iter()
                        .map(|port| NetworkPolicyPort {
                            port: Some(IntOrString::Int(i32::from(port))),
                            protocol: Some(protocol.to_string()),
                            end_port: None,
                        })
                        .collect(),
                ),
            }
        })
        .collect()
}

fn peer_for(target: &EgressTarget) -> NetworkPolicyPeer {
    match target {
        EgressTarget::Namespace(namespace) => namespace_peer(namespace),
        EgressTarget::Cidr(cidr) => NetworkPolicyPeer {
            ip_block: Some(IPBlock {
                cidr: cidr.clone(),
                except: None,
            }),
            ..Default::default()
        },
    }
}

fn namespace_peer(namespace: &str) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        namespace_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "kubernetes.io/metadata.name".to_string(),
                namespace.to_string(),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Platform ingress: the configured ingress-controller namespace plus
/// intra-namespace traffic.
fn platform_ingress(config: &NetworkPoliciesConfig, source_hash: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: metadata("allow-ingress", &NamespaceClass::Platform, source_hash),
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(LabelSelector::default()),
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![
                    namespace_peer(&config.ingress_controller_namespace),
                    NetworkPolicyPeer {
                        pod_selector: Some(LabelSelector::default()),
                        ..Default::default()
                    },
                ]),
                ports: None,
            }]),
            ..Default::default()
        }),
    }
}
