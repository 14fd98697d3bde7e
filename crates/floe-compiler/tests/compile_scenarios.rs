use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use floe_compiler::errors::InheritanceError;
use floe_compiler::{
    compile, parse_document, plugin_registry, resolve, CompiledArtifacts, DataProduct,
    DeploymentMode, Document, Identity, Manifest, ParentLoadError, ParentLoader,
};

struct MapLoader {
    manifests: HashMap<String, Manifest>,
}

impl MapLoader {
    fn new(entries: &[(&str, &str)]) -> Self {
        let manifests = entries
            .iter()
            .map(|(reference, yaml)| {
                let Document::Manifest(manifest) =
                    parse_document(yaml.as_bytes()).expect("fixture must parse")
                else {
                    panic!("fixture must be a Manifest");
                };
                (reference.to_string(), manifest)
            })
            .collect();
        MapLoader { manifests }
    }
}

#[async_trait]
impl ParentLoader for MapLoader {
    async fn load(&self, reference: &str) -> Result<Manifest, ParentLoadError> {
        self.manifests
            .get(reference)
            .cloned()
            .ok_or_else(|| ParentLoadError::new(format!("manifest {reference} not found")))
    }
}

fn product_of(yaml: &str) -> DataProduct {
    let Document::DataProduct(product) = parse_document(yaml.as_bytes()).expect("product parses")
    else {
        panic!("fixture must be a DataProduct");
    };
    product
}

async fn compile_with(
    loader: &MapLoader,
    product: &DataProduct,
) -> Result<CompiledArtifacts, Box<dyn std::error::Error>> {
    let doc = Document::DataProduct(product.clone());
    let resolved = resolve(&doc, loader).await?;
    let identity = Identity {
        product_id: product.product_id(resolved.domain.as_deref()),
    };
    Ok(compile(
        &resolved,
        product,
        identity,
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
        plugin_registry(),
    )?)
}

const ENTERPRISE_REF: &str = "oci://registry.acme.dev/floe/acme-platform:1.0.0";
const DOMAIN_REF: &str = "oci://registry.acme.dev/floe/acme-analytics:1.0.0";

const ENTERPRISE: &str = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-platform
  version: 1.0.0
  owner: platform@acme.dev
scope: enterprise
plugins:
  compute:
    type: duckdb
governance:
  pii_encryption: required
  audit_logging: enabled
  policy_enforcement_level: strict
  data_retention_days: 365
approved_plugins:
  compute: [duckdb, spark]
"#;

const DOMAIN: &str = r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: acme-analytics
  version: 1.0.0
  owner: analytics@acme.dev
scope: domain
parent: oci://registry.acme.dev/floe/acme-platform:1.0.0
plugins:
  compute:
    type: spark
"#;

#[tokio::test]
async fn simple_compile_produces_a_duckdb_registry() {
    let product = product_of(
        r#"
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
"#,
    );
    let loader = MapLoader::new(&[]);
    let artifacts = compile_with(&loader, &product).await.unwrap();

    assert_eq!(artifacts.mode, DeploymentMode::Simple);
    assert!(artifacts.inheritance_chain.is_empty());
    assert_eq!(artifacts.plugins.compute_registry.default, "duckdb");
    assert!(artifacts
        .plugins
        .compute_registry
        .configs
        .contains_key("duckdb"));
    assert!(artifacts.output_ports.is_none());
}

#[tokio::test]
async fn mesh_compile_keeps_ports_and_the_domain_compute_choice() {
    let product = product_of(
        r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
parent: oci://registry.acme.dev/floe/acme-analytics:1.0.0
transforms:
  - name: staging
output_ports:
  - name: orders-curated
    format: iceberg
"#,
    );
    let loader = MapLoader::new(&[(ENTERPRISE_REF, ENTERPRISE), (DOMAIN_REF, DOMAIN)]);
    let artifacts = compile_with(&loader, &product).await.unwrap();

    assert_eq!(artifacts.mode, DeploymentMode::Mesh);
    assert_eq!(artifacts.inheritance_chain.len(), 2);
    assert_eq!(artifacts.identity.product_id, "acme-analytics.orders");
    assert_eq!(artifacts.observability.namespace, "acme-analytics.orders");
    assert_eq!(artifacts.plugins.compute_registry.default, "spark");
    let ports = artifacts.output_ports.as_ref().unwrap();
    assert_eq!(ports[0].name, "orders-curated");
    // the chain is recorded root first
    assert_eq!(artifacts.inheritance_chain[0].scope.as_deref(), Some("enterprise"));
    assert_eq!(
        artifacts.inheritance_chain[1].reference.as_deref(),
        Some(DOMAIN_REF)
    );
    // governance flows from the enterprise root
    assert_eq!(artifacts.governance.data_retention_days, 365);
}

#[tokio::test]
async fn monotone_downgrade_rejects_with_the_exact_field_path() {
    let weakening_domain = DOMAIN.replace(
        "plugins:",
        "governance:\n  policy_enforcement_level: warn\nplugins:",
    );
    let product = product_of(
        r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
parent: oci://registry.acme.dev/floe/acme-analytics:1.0.0
transforms:
  - name: staging
"#,
    );
    let loader = MapLoader::new(&[
        (ENTERPRISE_REF, ENTERPRISE),
        (DOMAIN_REF, weakening_domain.as_str()),
    ]);
    let doc = Document::DataProduct(product);
    let err = resolve(&doc, &loader).await.unwrap_err();
    match err {
        InheritanceError::SecurityPolicyViolation {
            field,
            parent,
            child,
        } => {
            assert_eq!(field, "governance.policy_enforcement_level");
            assert_eq!(parent, "strict");
            assert_eq!(child, "warn");
        }
        other => panic!("expected SecurityPolicyViolation, got {other:?}"),
    }
}

#[tokio::test]
async fn inheritance_depth_five_succeeds() {
    // enterprise root plus four nested domains: five loads in total
    let mut entries: Vec<(String, String)> = vec![(
        "oci://registry.acme.dev/floe/root:1.0.0".to_string(),
        ENTERPRISE.to_string(),
    )];
    for level in 0..4 {
        let parent = if level == 3 {
            "oci://registry.acme.dev/floe/root:1.0.0".to_string()
        } else {
            format!("oci://registry.acme.dev/floe/level-{}:1.0.0", level + 1)
        };
        entries.push((
            format!("oci://registry.acme.dev/floe/level-{level}:1.0.0"),
            format!(
                r#"
apiVersion: floe.dev/v1alpha1
kind: Manifest
metadata:
  name: level-{level}
  version: 1.0.0
  owner: platform@acme.dev
scope: domain
parent: {parent}
"#
            ),
        ));
    }
    let refs: Vec<(&str, &str)> = entries
        .iter()
        .map(|(reference, yaml)| (reference.as_str(), yaml.as_str()))
        .collect();
    let loader = MapLoader::new(&refs);

    let product = product_of(
        r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
parent: oci://registry.acme.dev/floe/level-0:1.0.0
transforms:
  - name: staging
"#,
    );
    let artifacts = compile_with(&loader, &product).await.unwrap();
    assert_eq!(artifacts.inheritance_chain.len(), 5);
    assert_eq!(artifacts.mode, DeploymentMode::Mesh);
}

#[tokio::test]
async fn compilation_is_deterministic_and_round_trips_bit_exact() {
    let product = product_of(
        r#"
apiVersion: floe.dev/v1alpha1
kind: DataProduct
metadata:
  name: orders
  version: 0.1.0
  owner: data@acme.dev
parent: oci://registry.acme.dev/floe/acme-analytics:1.0.0
transforms:
  - name: staging
"#,
    );
    let loader = MapLoader::new(&[(ENTERPRISE_REF, ENTERPRISE), (DOMAIN_REF, DOMAIN)]);

    let first = compile_with(&loader, &product).await.unwrap();
    let second = compile_with(&loader, &product).await.unwrap();
    assert_eq!(first.metadata.source_hash, second.metadata.source_hash);

    let first_bytes = first.to_canonical_json().unwrap();
    assert_eq!(first_bytes, second.to_canonical_json().unwrap());

    let reparsed = CompiledArtifacts::from_slice(&first_bytes).unwrap();
    assert_eq!(reparsed.to_canonical_json().unwrap(), first_bytes);
}
