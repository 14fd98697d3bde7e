use std::collections::BTreeMap;
use std::fmt::Write;

use floe_compiler::SecurityConfig;

use crate::GeneratedObject;

/// Markdown overview written next to the generated YAML.
pub(crate) fn render(
    objects: &BTreeMap<String, Vec<GeneratedObject>>,
    security: &SecurityConfig,
    domains: &[String],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Generated network and security manifests\n");
    let _ = writeln!(
        out,
        "- network policies: {}",
        if security.network_policies.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    let _ = writeln!(
        out,
        "- external https egress: {}",
        if security.network_policies.allow_external_https {
            "allowed (TCP/443 to 0.0.0.0/0)"
        } else {
            "blocked"
        }
    );
    let _ = writeln!(
        out,
        "- domains: {}\n",
        if domains.is_empty() {
            "none".to_string()
        } else {
            domains.join(", ")
        }
    );

    let _ = writeln!(out, "| Namespace | Kind | Name |");
    let _ = writeln!(out, "|---|---|---|");
    for (namespace, set) in objects {
        for object in set {
            let _ = writeln!(out, "| {} | {} | {} |", namespace, object.kind(), object.name());
        }
    }
    out
}
