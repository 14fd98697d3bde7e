use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::errors::{SchemaError, SchemaResult};
use crate::plugins::PluginCategory;

use super::{DataProduct, Document, EgressAllowRule, Manifest, ManifestKind, API_VERSION};

pub const NAME_PATTERN: &str = "^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$";
pub const SECRET_NAME_PATTERN: &str = "^[a-z0-9-]+$";

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(NAME_PATTERN).unwrap();
    static ref SECRET_NAME_RE: Regex = Regex::new(SECRET_NAME_PATTERN).unwrap();
}

pub(crate) fn validate_name(name: &str) -> Result<(), ValidationError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "must be a lowercase dns-label of 3 to 63 characters",
        ))
    }
}

pub(crate) fn validate_secret_name(name: &str) -> Result<(), ValidationError> {
    if SECRET_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "must contain only lowercase alphanumerics and dashes",
        ))
    }
}

pub(crate) fn validate_semver(version: &str) -> Result<(), ValidationError> {
    match semver::Version::parse(version) {
        Ok(_) => Ok(()),
        Err(_) => Err(ValidationError::new("must be a semantic version")),
    }
}

pub(crate) fn validate_egress_target(rule: &EgressAllowRule) -> Result<(), ValidationError> {
    match (&rule.to_namespace, &rule.to_cidr) {
        (Some(_), None) | (None, Some(_)) => Ok(()),
        (Some(_), Some(_)) => Err(ValidationError::new(
            "to_namespace and to_cidr are mutually exclusive",
        )),
        (None, None) => Err(ValidationError::new(
            "one of to_namespace or to_cidr is required",
        )),
    }
}

pub(crate) fn validate_parent_uri(uri: &str) -> SchemaResult<()> {
    let remainder = uri.strip_prefix("oci://").ok_or_else(|| {
        SchemaError::invalid("parent", format!("{uri:?} is not an oci:// reference"))
    })?;
    if remainder.is_empty() || remainder.starts_with('/') {
        return Err(SchemaError::invalid(
            "parent",
            format!("{uri:?} is missing the registry host"),
        ));
    }
    Ok(())
}

/// Parse a YAML document into a [`Manifest`] or [`DataProduct`].
///
/// Unknown fields inside `security.*`, `governance.*` and `approved_plugins`
/// are rejected; unknown fields anywhere else are recorded as warnings on the
/// returned document so that newer manifests keep loading on older tools.
pub fn parse_document(bytes: &[u8]) -> SchemaResult<Document> {
    let value: Value = serde_yaml::from_slice(bytes)?;
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::invalid("kind", "missing or not a string"))?;

    match kind {
        "Manifest" => {
            let mut warnings = Vec::new();
            scan_unknown_fields(&value, ManifestKind::Manifest, &mut warnings)?;
            let raw_platform = platform_subset(&value)?;
            let mut manifest: Manifest = serde_yaml::from_value(value)?;
            manifest.warnings = warnings;
            manifest.raw_platform = raw_platform;
            validate_common(
                &manifest.api_version,
                &manifest.platform,
                manifest.validate(),
            )?;
            manifest.validate_scope_rules()?;
            Ok(Document::Manifest(manifest))
        }
        "DataProduct" => {
            let mut warnings = Vec::new();
            scan_unknown_fields(&value, ManifestKind::DataProduct, &mut warnings)?;
            let raw_platform = platform_subset(&value)?;
            let mut product: DataProduct = serde_yaml::from_value(value)?;
            product.warnings = warnings;
            product.raw_platform = raw_platform;
            validate_common(&product.api_version, &product.platform, product.validate())?;
            if let Some(parent) = &product.parent {
                validate_parent_uri(parent)?;
            }
            Ok(Document::DataProduct(product))
        }
        other => Err(SchemaError::invalid(
            "kind",
            format!("unknown kind {other:?}, expected Manifest or DataProduct"),
        )),
    }
}

/// The `{plugins, governance, security}` subtree as written, converted to
/// JSON for the resolver's layer merge.
fn platform_subset(value: &Value) -> SchemaResult<serde_json::Value> {
    let mut map = serde_json::Map::new();
    for key in ["plugins", "governance", "security"] {
        if let Some(subtree) = value.get(key) {
            let subtree = serde_json::to_value(subtree).map_err(|e| {
                SchemaError::invalid(key, format!("cannot normalize section: {e}"))
            })?;
            map.insert(key.to_string(), subtree);
        }
    }
    Ok(serde_json::Value::Object(map))
}

fn validate_common(
    api_version: &str,
    platform: &super::PlatformConfig,
    derived: Result<(), ValidationErrors>,
) -> SchemaResult<()> {
    if api_version != API_VERSION {
        return Err(SchemaError::invalid(
            "apiVersion",
            format!("expected {API_VERSION}, got {api_version:?}"),
        ));
    }
    derived.map_err(|e| schema_error_from("", &e))?;
    // nested map values are not reached by the derive
    for (category, selection) in &platform.plugins {
        selection
            .validate()
            .map_err(|e| schema_error_from(&format!("plugins.{category}"), &e))?;
        if selection.plugin_type.trim().is_empty() {
            return Err(SchemaError::invalid(
                format!("plugins.{category}.type"),
                "plugin type cannot be empty",
            ));
        }
    }
    Ok(())
}

/// Flatten a `validator` error tree into the first offending path.
fn schema_error_from(prefix: &str, errors: &ValidationErrors) -> SchemaError {
    fn first(prefix: String, errors: &ValidationErrors) -> Option<(String, String)> {
        for (field, kind) in errors.errors() {
            let path = match (prefix.as_str(), *field) {
                ("", f) => f.to_string(),
                (p, "__all__") => p.to_string(),
                (p, f) => format!("{p}.{f}"),
            };
            match kind {
                ValidationErrorsKind::Field(list) => {
                    if let Some(error) = list.first() {
                        let reason = error
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| error.code.to_string());
                        return Some((path, reason));
                    }
                }
                ValidationErrorsKind::Struct(inner) => {
                    if let Some(found) = first(path, inner) {
                        return Some(found);
                    }
                }
                ValidationErrorsKind::List(map) => {
                    for (index, inner) in map {
                        if let Some(found) = first(format!("{path}[{index}]"), inner) {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }

    let (path, reason) = first(prefix.to_string(), errors)
        .unwrap_or_else(|| (prefix.to_string(), "validation failed".to_string()));
    SchemaError::Invalid { path, reason }
}

enum FieldPolicy {
    /// Unknown keys are a hard error (security-sensitive sections).
    Deny,
    /// Unknown keys are recorded as warnings (forward compatibility).
    Warn,
}

const MANIFEST_KEYS: &[&str] = &[
    "apiVersion",
    "kind",
    "metadata",
    "scope",
    "parent",
    "plugins",
    "governance",
    "security",
    "approved_plugins",
    "approved_products",
];

const DATA_PRODUCT_KEYS: &[&str] = &[
    "apiVersion",
    "kind",
    "metadata",
    "parent",
    "plugins",
    "governance",
    "security",
    "transforms",
    "schedule",
    "output_ports",
    "input_ports",
    "data_contracts",
];

const METADATA_KEYS: &[&str] = &["name", "version", "owner", "description"];
const GOVERNANCE_KEYS: &[&str] = &[
    "pii_encryption",
    "audit_logging",
    "policy_enforcement_level",
    "data_retention_days",
];
const SECURITY_KEYS: &[&str] = &["rbac", "pod_security", "namespace_isolation", "network_policies"];
const NETWORK_POLICIES_KEYS: &[&str] = &[
    "enabled",
    "default_deny",
    "allow_external_https",
    "ingress_controller_namespace",
    "jobs_egress_allow",
    "platform_egress_allow",
];
const EGRESS_RULE_KEYS: &[&str] = &["name", "to_namespace", "to_cidr", "port", "protocol"];
const POD_SECURITY_KEYS: &[&str] = &["enforce", "writable_paths"];
const RBAC_KEYS: &[&str] = &["create_service_accounts", "roles"];
const RBAC_ROLE_KEYS: &[&str] = &["name", "service_account", "rules", "namespaces"];
const RBAC_RULE_KEYS: &[&str] = &["api_groups", "resources", "verbs"];
const PLUGIN_SELECTION_KEYS: &[&str] = &["type", "config", "connection_secret_ref"];
const SECRET_REF_KEYS: &[&str] = &["source", "name", "key"];
const TRANSFORM_KEYS: &[&str] = &["name", "compute", "sql", "config"];
const SCHEDULE_KEYS: &[&str] = &["cron", "timezone"];
const OUTPUT_PORT_KEYS: &[&str] = &["name", "format", "schema_ref", "description"];
const INPUT_PORT_KEYS: &[&str] = &["name", "source", "description"];

pub(crate) fn scan_unknown_fields(
    value: &Value,
    kind: ManifestKind,
    warnings: &mut Vec<String>,
) -> SchemaResult<()> {
    let top_level = match kind {
        ManifestKind::Manifest => MANIFEST_KEYS,
        ManifestKind::DataProduct => DATA_PRODUCT_KEYS,
    };
    check_keys(value, "", top_level, FieldPolicy::Warn, warnings)?;
    check_keys(
        value.get("metadata").unwrap_or(&Value::Null),
        "metadata",
        METADATA_KEYS,
        FieldPolicy::Warn,
        warnings,
    )?;

    if let Some(governance) = value.get("governance") {
        check_keys(
            governance,
            "governance",
            GOVERNANCE_KEYS,
            FieldPolicy::Deny,
            warnings,
        )?;
    }
    if let Some(security) = value.get("security") {
        scan_security(security, warnings)?;
    }
    if let Some(plugins) = value.get("plugins") {
        scan_plugins(plugins, warnings)?;
    }
    if let Some(approved) = value.get("approved_plugins") {
        scan_approved_plugins(approved)?;
    }

    if kind == ManifestKind::DataProduct {
        scan_list(
            value.get("transforms"),
            "transforms",
            TRANSFORM_KEYS,
            warnings,
        )?;
        if let Some(schedule) = value.get("schedule") {
            check_keys(schedule, "schedule", SCHEDULE_KEYS, FieldPolicy::Warn, warnings)?;
        }
        scan_list(
            value.get("output_ports"),
            "output_ports",
            OUTPUT_PORT_KEYS,
            warnings,
        )?;
        scan_list(
            value.get("input_ports"),
            "input_ports",
            INPUT_PORT_KEYS,
            warnings,
        )?;
    }
    Ok(())
}

fn scan_security(security: &Value, warnings: &mut Vec<String>) -> SchemaResult<()> {
    check_keys(security, "security", SECURITY_KEYS, FieldPolicy::Deny, warnings)?;
    if let Some(network) = security.get("network_policies") {
        check_keys(
            network,
            "security.network_policies",
            NETWORK_POLICIES_KEYS,
            FieldPolicy::Deny,
            warnings,
        )?;
        for field in ["jobs_egress_allow", "platform_egress_allow"] {
            if let Some(Value::Sequence(rules)) = network.get(field) {
                for (index, rule) in rules.iter().enumerate() {
                    check_keys(
                        rule,
                        &format!("security.network_policies.{field}[{index}]"),
                        EGRESS_RULE_KEYS,
                        FieldPolicy::Deny,
                        warnings,
                    )?;
                }
            }
        }
    }
    if let Some(pod_security) = security.get("pod_security") {
        check_keys(
            pod_security,
            "security.pod_security",
            POD_SECURITY_KEYS,
            FieldPolicy::Deny,
            warnings,
        )?;
    }
    if let Some(rbac) = security.get("rbac") {
        check_keys(rbac, "security.rbac", RBAC_KEYS, FieldPolicy::Deny, warnings)?;
        if let Some(Value::Sequence(roles)) = rbac.get("roles") {
            for (role_index, role) in roles.iter().enumerate() {
                let role_path = format!("security.rbac.roles[{role_index}]");
                check_keys(role, &role_path, RBAC_ROLE_KEYS, FieldPolicy::Deny, warnings)?;
                if let Some(Value::Sequence(rules)) = role.get("rules") {
                    for (rule_index, rule) in rules.iter().enumerate() {
                        check_keys(
                            rule,
                            &format!("{role_path}.rules[{rule_index}]"),
                            RBAC_RULE_KEYS,
                            FieldPolicy::Deny,
                            warnings,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn scan_plugins(plugins: &Value, warnings: &mut Vec<String>) -> SchemaResult<()> {
    let Value::Mapping(map) = plugins else {
        return Err(SchemaError::invalid("plugins", "expected a mapping"));
    };
    for (key, selection) in map {
        let category = key.as_str().unwrap_or_default();
        if !PluginCategory::ALL.iter().any(|c| c.as_str() == category) {
            return Err(SchemaError::invalid(
                format!("plugins.{category}"),
                format!(
                    "unknown plugin category, expected one of {:?}",
                    PluginCategory::ALL.map(|c| c.as_str())
                ),
            ));
        }
        let path = format!("plugins.{category}");
        check_keys(selection, &path, PLUGIN_SELECTION_KEYS, FieldPolicy::Warn, warnings)?;
        if let Some(secret_ref) = selection.get("connection_secret_ref") {
            check_keys(
                secret_ref,
                &format!("{path}.connection_secret_ref"),
                SECRET_REF_KEYS,
                FieldPolicy::Warn,
                warnings,
            )?;
        }
        // `config` is deliberately opaque: plugins define their own shape.
    }
    Ok(())
}

fn scan_approved_plugins(approved: &Value) -> SchemaResult<()> {
    let Value::Mapping(map) = approved else {
        return Err(SchemaError::invalid("approved_plugins", "expected a mapping"));
    };
    for key in map.keys() {
        let category = key.as_str().unwrap_or_default();
        if !PluginCategory::ALL.iter().any(|c| c.as_str() == category) {
            return Err(SchemaError::UnknownField {
                path: format!("approved_plugins.{category}"),
                section: "approved_plugins".to_string(),
            });
        }
    }
    Ok(())
}

fn scan_list(
    value: Option<&Value>,
    path: &str,
    allowed: &[&str],
    warnings: &mut Vec<String>,
) -> SchemaResult<()> {
    if let Some(Value::Sequence(items)) = value {
        for (index, item) in items.iter().enumerate() {
            check_keys(
                item,
                &format!("{path}[{index}]"),
                allowed,
                FieldPolicy::Warn,
                warnings,
            )?;
        }
    }
    Ok(())
}

fn check_keys(
    value: &Value,
    path: &str,
    allowed: &[&str],
    policy: FieldPolicy,
    warnings: &mut Vec<String>,
) -> SchemaResult<()> {
    let Value::Mapping(map) = value else {
        // wrong shapes surface as serde errors with better context
        return Ok(());
    };
    for key in map.keys() {
        let key = key.as_str().unwrap_or_default();
        if allowed.contains(&key) {
            continue;
        }
        let field_path = if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}.{key}")
        };
        match policy {
            FieldPolicy::Deny => {
                return Err(SchemaError::UnknownField {
                    path: field_path,
                    section: path.to_string(),
                });
            }
            FieldPolicy::Warn => {
                warnings.push(format!("unknown field {field_path}, ignoring"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MINIMAL_PRODUCT: &str = r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
plugins:
  compute:
    type: duckdb
transforms:
  - name: staging
"#;

    #[test]
    fn parses_a_minimal_data_product() {
        let doc = parse_document(MINIMAL_PRODUCT.as_bytes()).unwrap();
        let Document::DataProduct(product) = doc else {
            panic!("expected a DataProduct");
        };
        assert_eq!(product.metadata.name, "orders");
        assert_eq!(product.transforms.len(), 1);
        assert!(product.warnings.is_empty());
    }

    #[rstest]
    #[case("orders")]
    #[case("acme-analytics-1")]
    #[case("a1b")]
    fn accepts_valid_names(#[case] name: &str) {
        assert!(validate_name(name).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("ab")]
    #[case("-orders")]
    #[case("orders-")]
    #[case("Orders")]
    #[case("or_ders")]
    fn rejects_invalid_names(#[case] name: &str) {
        assert!(validate_name(name).is_err());
    }

    #[test]
    fn rejects_wrong_api_version() {
        let yaml = MINIMAL_PRODUCT.replace("floe.dev/v1alpha1", "floe.dev/v9");
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { path, .. } if path == "apiVersion"));
    }

    #[test]
    fn unknown_field_in_security_is_an_error() {
        let yaml = format!(
            "{MINIMAL_PRODUCT}security:\n  network_policies:\n    enabled: true\n    allow_everything: true\n"
        );
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownField { path, .. }
                if path == "security.network_policies.allow_everything"
        ));
    }

    #[test]
    fn unknown_field_in_governance_is_an_error() {
        let yaml = format!("{MINIMAL_PRODUCT}governance:\n  shredding: eager\n");
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownField { path, .. } if path == "governance.shredding"
        ));
    }

    #[test]
    fn unknown_field_in_metadata_is_a_warning() {
        let yaml = MINIMAL_PRODUCT.replace("owner: data@acme.dev", "owner: data@acme.dev\n  team: core");
        let doc = parse_document(yaml.as_bytes()).unwrap();
        assert_eq!(doc.warnings(), &["unknown field metadata.team, ignoring"]);
    }

    #[test]
    fn enterprise_scope_rejects_parent() {
        let yaml = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-platform
  version: 1.0.0
  owner: platform@acme.dev
scope: enterprise
parent: oci://registry.acme.dev/floe/root:1.0.0
"#;
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { path, .. } if path == "parent"));
    }

    #[test]
    fn domain_scope_requires_parent() {
        let yaml = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-analytics
  version: 1.0.0
  owner: analytics@acme.dev
scope: domain
"#;
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { path, .. } if path == "parent"));
    }

    #[test]
    fn approved_plugins_requires_enterprise_scope() {
        let yaml = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-analytics
  version: 1.0.0
  owner: analytics@acme.dev
scope: domain
parent: oci://registry.acme.dev/floe/acme-platform:1.0.0
approved_plugins:
  compute: [duckdb]
"#;
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { path, .. } if path == "approved_plugins"));
    }

    #[test]
    fn unknown_approved_plugin_category_is_an_error() {
        let yaml = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-platform
  version: 1.0.0
  owner: platform@acme.dev
scope: enterprise
approved_plugins:
  warehouse: [snowflake]
"#;
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::UnknownField { path, .. } if path == "approved_plugins.warehouse"
        ));
    }

    #[test]
    fn egress_rule_requires_exactly_one_target() {
        let yaml = format!(
            "{MINIMAL_PRODUCT}security:\n  network_policies:\n    enabled: true\n    jobs_egress_allow:\n      - name: warehouse\n        port: 5432\n        protocol: TCP\n"
        );
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        let SchemaError::Invalid { reason, .. } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert!(reason.contains("to_namespace or to_cidr"));
    }

    #[test]
    fn parent_uri_must_be_oci() {
        let yaml = MINIMAL_PRODUCT.to_string() + "parent: https://registry.acme.dev/floe/root:1.0.0\n";
        let err = parse_document(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid { path, .. } if path == "parent"));
    }
}
