use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use thiserror::Error;

use crate::{GeneratedManifests, GeneratedObject, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

#[derive(Error, Debug)]
pub enum NetworkValidationError {
    #[error("namespace {namespace}: no default-deny policy was generated")]
    MissingDefaultDeny { namespace: String },
    #[error("namespace {namespace}: the DNS egress opening (UDP/53 to kube-system) is missing")]
    MissingDnsEgress { namespace: String },
    #[error("{namespace}/{name}: missing the {MANAGED_BY_LABEL} label")]
    MissingManagedByLabel { namespace: String, name: String },
    #[error("{namespace}/{name}: egress opening with an out-of-range port")]
    InvalidPort { namespace: String, name: String },
}

/// Dry-run the generated set against the invariants the generator promises:
/// default-deny present wherever policies are enabled, DNS never cut off,
/// every object labeled as managed.
pub fn validate(manifests: &GeneratedManifests) -> Result<(), NetworkValidationError> {
    for (namespace, set) in &manifests.objects {
        let has_policies = set
            .iter()
            .any(|o| matches!(o, GeneratedObject::NetworkPolicy(_)));

        for object in set {
            let managed = object
                .labels()
                .and_then(|labels| labels.get(MANAGED_BY_LABEL))
                .map(|value| value == MANAGED_BY_VALUE)
                .unwrap_or(false);
            if !managed {
                return Err(NetworkValidationError::MissingManagedByLabel {
                    namespace: namespace.clone(),
                    name: object.name(),
                });
            }
            if let GeneratedObject::NetworkPolicy(policy) = object {
                check_ports(namespace, policy)?;
            }
        }

        if has_policies {
            if !set.iter().any(|o| is_default_deny(o)) {
                return Err(NetworkValidationError::MissingDefaultDeny {
                    namespace: namespace.clone(),
                });
            }
            if !set.iter().any(|o| has_dns_egress(o)) {
                return Err(NetworkValidationError::MissingDnsEgress {
                    namespace: namespace.clone(),
                });
            }
        }
    }
    Ok(())
}

fn is_default_deny(object: &GeneratedObject) -> bool {
    let GeneratedObject::NetworkPolicy(policy) = object else {
        return false;
    };
    policy
        .spec
        .as_ref()
        .map(|spec| {
            spec.pod_selector == Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector::default())
                && spec
                    .policy_types
                    .as_ref()
                    .map(|t| t.contains(&"Ingress".to_string()) && t.contains(&"Egress".to_string()))
                    .unwrap_or(false)
                && spec.ingress.is_none()
                && spec.egress.is_none()
        })
        .unwrap_or(false)
}

fn has_dns_egress(object: &GeneratedObject) -> bool {
    let GeneratedObject::NetworkPolicy(policy) = object else {
        return false;
    };
    let Some(rules) = policy.spec.as_ref().and_then(|s| s.egress.as_ref()) else {
        return false;
    };
    rules.iter().any(|rule| {
        let to_kube_system = rule
            .to
            .as_ref()
            .map(|peers| {
                peers.iter().any(|peer| {
                    peer.namespace_selector
                        .as_ref()
                        .and_then(|s| s.match_labels.as_ref())
                        .map(|labels| {
                            labels.get("kubernetes.io/metadata.name").map(String::as_str)
                                == Some("kube-system")
                        })
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        let udp_53 = rule
            .ports
            .as_ref()
            .map(|ports| {
                ports.iter().any(|port| {
                    port.protocol.as_deref() == Some("UDP")
                        && port.port == Some(IntOrString::Int(53))
                })
            })
            .unwrap_or(false);
        to_kube_system && udp_53
    })
}

fn check_ports(
    namespace: &str,
    policy: &k8s_openapi::api::networking::v1::NetworkPolicy,
) -> Result<(), NetworkValidationError> {
    let rules = policy.spec.iter().flat_map(|spec| {
        spec.egress
            .iter()
            .flatten()
            .filter_map(|r| r.ports.as_ref())
            .chain(spec.ingress.iter().flatten().filter_map(|r| r.ports.as_ref()))
    });
    for ports in rules {
        for port in ports {
            if let Some(IntOrString::Int(value)) = port.port {
                if !(1..=65535).contains(&value) {
                    return Err(NetworkValidationError::InvalidPort {
                        namespace: namespace.to_string(),
                        name: policy.metadata.name.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }
    Ok(())
}
