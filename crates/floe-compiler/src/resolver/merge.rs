use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::InheritanceError;

/// How a field path combines across inheritance layers. The table is static:
/// the resolver walks the platform schema once per layer and picks the
/// strategy for each path it encounters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// Child value replaces the parent value wholesale.
    Override,
    /// Objects merge key by key; anything else overrides.
    Recurse,
    /// Numeric fields keep the larger of parent and child.
    Max,
    /// Ordered string domain; a child may only keep or climb the order.
    Monotone(&'static [&'static str]),
    /// Lists concatenate; entries sharing the logical key are replaced by
    /// the child's version instead of duplicated.
    ExtendByKey(&'static str),
    /// The field never flows down a chain; it is meaningful only at the
    /// scope that declared it.
    Forbid,
}

pub(crate) fn strategy_for(path: &str) -> Strategy {
    match path {
        "governance.pii_encryption" => Strategy::Monotone(&["optional", "required"]),
        "governance.audit_logging" => Strategy::Monotone(&["disabled", "enabled"]),
        "governance.policy_enforcement_level" => Strategy::Monotone(&["off", "warn", "strict"]),
        "governance.data_retention_days" => Strategy::Max,
        "approved_plugins" | "approved_products" => Strategy::Forbid,
        "security.network_policies.jobs_egress_allow"
        | "security.network_policies.platform_egress_allow" => Strategy::ExtendByKey("name"),
        // a child replaces a whole per-category selection, config included
        p if p.starts_with("plugins.") => Strategy::Override,
        _ => Strategy::Recurse,
    }
}

/// Merge one inheritance layer into the accumulated configuration,
/// recording which layer contributed each leaf path.
pub(crate) fn merge_layer(
    acc: &mut Value,
    layer: &Value,
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
) -> Result<(), InheritanceError> {
    merge_object(acc, layer, source, field_sources, "")
}

fn merge_object(
    acc: &mut Value,
    layer: &Value,
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
    path: &str,
) -> Result<(), InheritanceError> {
    let Value::Object(layer_map) = layer else {
        return Ok(());
    };
    if !acc.is_object() {
        *acc = Value::Object(serde_json::Map::new());
    }

    for (key, child_value) in layer_map {
        let child_path = join(path, key);
        match strategy_for(&child_path) {
            Strategy::Forbid => continue,
            Strategy::Override => {
                set_value(acc, key, &child_path, child_value.clone(), source, field_sources);
            }
            Strategy::Max => {
                let existing = acc.get(key).and_then(Value::as_u64);
                let child = child_value.as_u64();
                match (existing, child) {
                    (Some(parent), Some(child)) if child <= parent => {}
                    _ => {
                        set_value(acc, key, &child_path, child_value.clone(), source, field_sources);
                    }
                }
            }
            Strategy::Monotone(order) => {
                merge_monotone(acc, key, &child_path, child_value, order, source, field_sources)?;
            }
            Strategy::ExtendByKey(logical_key) => {
                merge_extend(acc, key, &child_path, child_value, logical_key, source, field_sources);
            }
            Strategy::Recurse => {
                let both_objects =
                    child_value.is_object() && acc.get(key).map(Value::is_object).unwrap_or(false);
                if both_objects {
                    let entry = acc
                        .as_object_mut()
                        .and_then(|map| map.get_mut(key))
                        .expect("checked above");
                    merge_object(entry, child_value, source, field_sources, &child_path)?;
                } else {
                    set_value(acc, key, &child_path, child_value.clone(), source, field_sources);
                }
            }
        }
    }
    Ok(())
}

fn merge_monotone(
    acc: &mut Value,
    key: &str,
    path: &str,
    child_value: &Value,
    order: &'static [&'static str],
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
) -> Result<(), InheritanceError> {
    let rank = |value: &Value| {
        value
            .as_str()
            .and_then(|s| order.iter().position(|level| *level == s))
    };
    let existing = acc.get(key);
    match (existing.and_then(|v| rank(v)), rank(child_value)) {
        (Some(parent_rank), Some(child_rank)) if child_rank < parent_rank => {
            Err(InheritanceError::SecurityPolicyViolation {
                field: path.to_string(),
                parent: existing
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                child: child_value.as_str().unwrap_or_default().to_string(),
            })
        }
        (Some(parent_rank), Some(child_rank)) if child_rank == parent_rank => Ok(()),
        _ => {
            set_value(acc, key, path, child_value.clone(), source, field_sources);
            Ok(())
        }
    }
}

fn merge_extend(
    acc: &mut Value,
    key: &str,
    path: &str,
    child_value: &Value,
    logical_key: &str,
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
) {
    let Value::Array(additions) = child_value else {
        return;
    };
    if additions.is_empty() {
        return;
    }
    let mut merged = match acc.get(key) {
        Some(Value::Array(existing)) => existing.clone(),
        _ => Vec::new(),
    };
    for addition in additions {
        let addition_key = addition.get(logical_key);
        let replaced = addition_key.is_some()
            && merged.iter_mut().any(|entry| {
                if entry.get(logical_key) == addition_key {
                    *entry = addition.clone();
                    true
                } else {
                    false
                }
            });
        if !replaced {
            merged.push(addition.clone());
        }
    }
    set_value(acc, key, path, Value::Array(merged), source, field_sources);
}

fn set_value(
    acc: &mut Value,
    key: &str,
    path: &str,
    value: Value,
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
) {
    record_subtree(path, &value, source, field_sources);
    if let Value::Object(map) = acc {
        map.insert(key.to_string(), value);
    }
}

/// Record `source` for every leaf path under `value`. Scalars and arrays are
/// leaves; objects recurse.
fn record_subtree(
    path: &str,
    value: &Value,
    source: &str,
    field_sources: &mut BTreeMap<String, String>,
) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                record_subtree(&join(path, key), child, source, field_sources);
            }
        }
        _ => {
            field_sources.insert(path.to_string(), source.to_string());
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merge_all(layers: &[(&str, Value)]) -> Result<(Value, BTreeMap<String, String>), InheritanceError> {
        let mut acc = Value::Object(serde_json::Map::new());
        let mut sources = BTreeMap::new();
        for (name, layer) in layers {
            merge_layer(&mut acc, layer, name, &mut sources)?;
        }
        Ok((acc, sources))
    }

    #[test]
    fn child_category_replaces_parent_selection_wholesale() {
        let (merged, sources) = merge_all(&[
            (
                "enterprise",
                json!({"plugins": {"compute": {"type": "duckdb", "config": {"threads": 4}}}}),
            ),
            (
                "analytics",
                json!({"plugins": {"compute": {"type": "spark"}}}),
            ),
        ])
        .unwrap();
        assert_eq!(merged["plugins"]["compute"], json!({"type": "spark"}));
        assert_eq!(sources["plugins.compute.type"], "analytics");
    }

    #[test]
    fn retention_days_keep_the_maximum() {
        let (merged, _) = merge_all(&[
            ("enterprise", json!({"governance": {"data_retention_days": 365}})),
            ("analytics", json!({"governance": {"data_retention_days": 30}})),
        ])
        .unwrap();
        assert_eq!(merged["governance"]["data_retention_days"], json!(365));

        let (merged, _) = merge_all(&[
            ("enterprise", json!({"governance": {"data_retention_days": 30}})),
            ("analytics", json!({"governance": {"data_retention_days": 400}})),
        ])
        .unwrap();
        assert_eq!(merged["governance"]["data_retention_days"], json!(400));
    }

    #[test]
    fn weakening_enforcement_is_rejected_with_the_exact_path() {
        let err = merge_all(&[
            (
                "enterprise",
                json!({"governance": {"policy_enforcement_level": "strict"}}),
            ),
            (
                "analytics",
                json!({"governance": {"policy_enforcement_level": "warn"}}),
            ),
        ])
        .unwrap_err();
        match err {
            InheritanceError::SecurityPolicyViolation { field, parent, child } => {
                assert_eq!(field, "governance.policy_enforcement_level");
                assert_eq!(parent, "strict");
                assert_eq!(child, "warn");
            }
            other => panic!("expected SecurityPolicyViolation, got {other:?}"),
        }
    }

    #[test]
    fn strengthening_is_allowed_and_attributed_to_the_child() {
        let (merged, sources) = merge_all(&[
            ("enterprise", json!({"governance": {"pii_encryption": "optional"}})),
            ("analytics", json!({"governance": {"pii_encryption": "required"}})),
        ])
        .unwrap();
        assert_eq!(merged["governance"]["pii_encryption"], json!("required"));
        assert_eq!(sources["governance.pii_encryption"], "analytics");
    }

    #[test]
    fn equal_strength_keeps_the_parent_attribution() {
        let (_, sources) = merge_all(&[
            ("enterprise", json!({"governance": {"audit_logging": "enabled"}})),
            ("analytics", json!({"governance": {"audit_logging": "enabled"}})),
        ])
        .unwrap();
        assert_eq!(sources["governance.audit_logging"], "enterprise");
    }

    #[test]
    fn egress_lists_extend_and_dedupe_by_name() {
        let (merged, _) = merge_all(&[
            (
                "enterprise",
                json!({"security": {"network_policies": {"jobs_egress_allow": [
                    {"name": "warehouse", "to_cidr": "10.0.0.0/8", "port": 5432, "protocol": "TCP"},
                    {"name": "metrics", "to_namespace": "observability", "port": 4317, "protocol": "TCP"},
                ]}}}),
            ),
            (
                "analytics",
                json!({"security": {"network_policies": {"jobs_egress_allow": [
                    {"name": "warehouse", "to_cidr": "10.1.0.0/16", "port": 5432, "protocol": "TCP"},
                    {"name": "events", "to_namespace": "kafka", "port": 9092, "protocol": "TCP"},
                ]}}}),
            ),
        ])
        .unwrap();
        let rules = merged["security"]["network_policies"]["jobs_egress_allow"]
            .as_array()
            .unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0]["to_cidr"], json!("10.1.0.0/16"));
        assert_eq!(rules[1]["name"], json!("metrics"));
        assert_eq!(rules[2]["name"], json!("events"));
    }

    #[test]
    fn whitelists_never_flow_down() {
        let (merged, sources) = merge_all(&[(
            "enterprise",
            json!({"approved_plugins": {"compute": ["duckdb"]}, "governance": {"audit_logging": "enabled"}}),
        )])
        .unwrap();
        assert!(merged.get("approved_plugins").is_none());
        assert!(!sources.contains_key("approved_plugins.compute"));
    }

    #[test]
    fn scalars_recurse_and_override_field_by_field() {
        let (merged, sources) = merge_all(&[
            (
                "enterprise",
                json!({"security": {"network_policies": {"enabled": true, "allow_external_https": false}}}),
            ),
            (
                "analytics",
                json!({"security": {"network_policies": {"allow_external_https": true}}}),
            ),
        ])
        .unwrap();
        assert_eq!(merged["security"]["network_policies"]["enabled"], json!(true));
        assert_eq!(
            merged["security"]["network_policies"]["allow_external_https"],
            json!(true)
        );
        assert_eq!(sources["security.network_policies.enabled"], "enterprise");
        assert_eq!(
            sources["security.network_policies.allow_external_https"],
            "analytics"
        );
    }
}
