use k8s_openapi::api::core::v1::{
    Capabilities, EmptyDirVolumeSource, Namespace, SeccompProfile, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use floe_compiler::{PodSecurityConfig, PssLevel};

use crate::labels::base_labels;
use crate::network_policy::NamespaceClass;

const PSS_ENFORCE_LABEL: &str = "pod-security.kubernetes.io/enforce";
const PSS_AUDIT_LABEL: &str = "pod-security.kubernetes.io/audit";
const PSS_WARN_LABEL: &str = "pod-security.kubernetes.io/warn";

/// Namespace object with Pod Security Admission labels. The enforce level is
/// configurable; audit and warn always run at `restricted` so drift shows up
/// before it is enforced.
pub(crate) fn namespace(
    class: &NamespaceClass,
    pod_security: &PodSecurityConfig,
    source_hash: &str,
) -> Namespace {
    let enforce = pod_security
        .enforce
        .unwrap_or(match class {
            NamespaceClass::Platform => PssLevel::Baseline,
            _ => PssLevel::Restricted,
        });

    let mut labels = base_labels(source_hash, class.domain());
    labels.insert(PSS_ENFORCE_LABEL.to_string(), enforce.as_str().to_string());
    labels.insert(
        PSS_AUDIT_LABEL.to_string(),
        PssLevel::Restricted.as_str().to_string(),
    );
    labels.insert(
        PSS_WARN_LABEL.to_string(),
        PssLevel::Restricted.as_str().to_string(),
    );

    Namespace {
        metadata: ObjectMeta {
            name: Some(class.namespace_name()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Hardened pod-level defaults for job pods. The deploy layer grafts these
/// onto every job it schedules; they are not a standalone cluster object.
#[derive(Debug, Clone, Serialize)]
pub struct JobsPodSecurity {
    pub security_context: SecurityContext,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
}

pub(crate) fn jobs_pod_security(pod_security: &PodSecurityConfig) -> JobsPodSecurity {
    let security_context = SecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(1000),
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: None,
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    for (index, path) in pod_security.writable_paths.iter().enumerate() {
        let name = format!("writable-{index}");
        volumes.push(Volume {
            name: name.clone(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name,
            mount_path: path.clone(),
            ..Default::default()
        });
    }

    JobsPodSecurity {
        security_context,
        volumes,
        volume_mounts,
    }
}
