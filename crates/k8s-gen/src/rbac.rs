use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use floe_compiler::{RbacConfig, RbacRole};

use crate::labels::base_labels;
use crate::network_policy::JOBS_NAMESPACE;
use crate::GeneratedObject;

/// Emit ServiceAccounts, Roles and RoleBindings for the resolved rbac
/// section. Pure and idempotent: the same config always yields the same
/// objects, and applying them twice is a no-op for the cluster.
pub(crate) fn append_rbac_objects(
    objects: &mut BTreeMap<String, Vec<GeneratedObject>>,
    rbac: &RbacConfig,
    source_hash: &str,
) {
    for role in &rbac.roles {
        let namespaces: Vec<String> = if role.namespaces.is_empty() {
            vec![JOBS_NAMESPACE.to_string()]
        } else {
            role.namespaces.clone()
        };
        for namespace in namespaces {
            let set = objects.entry(namespace.clone()).or_default();
            if rbac.create_service_accounts {
                set.push(GeneratedObject::ServiceAccount(service_account(
                    role,
                    &namespace,
                    source_hash,
                )));
            }
            set.push(GeneratedObject::Role(k8s_role(role, &namespace, source_hash)));
            set.push(GeneratedObject::RoleBinding(role_binding(
                role,
                &namespace,
                source_hash,
            )));
        }
    }
}

fn object_meta(name: &str, namespace: &str, source_hash: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(base_labels(source_hash, None)),
        ..Default::default()
    }
}

fn service_account(role: &RbacRole, namespace: &str, source_hash: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(&role.service_account, namespace, source_hash),
        automount_service_account_token: Some(false),
        ..Default::default()
    }
}

fn k8s_role(role: &RbacRole, namespace: &str, source_hash: &str) -> Role {
    Role {
        metadata: object_meta(&role.name, namespace, source_hash),
        rules: Some(
            role.rules
                .iter()
                .map(|rule| PolicyRule {
                    api_groups: Some(rule.api_groups.clone()),
                    resources: Some(rule.resources.clone()),
                    verbs: rule.verbs.clone(),
                    ..Default::default()
                })
                .collect(),
        ),
    }
}

fn role_binding(role: &RbacRole, namespace: &str, source_hash: &str) -> RoleBinding {
    RoleBinding {
        metadata: object_meta(&format!("{}-binding", role.name), namespace, source_hash),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: role.service_account.clone(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}
