use std::path::PathBuf;

use clap::ArgMatches;
use tracing::info;

use k8s_gen::{generate, validate, GeneratedManifests};

use crate::compile::compile_dir;
use crate::errors::CliError;

async fn generate_from_dir(matches: &ArgMatches) -> Result<GeneratedManifests, CliError> {
    let manifest_dir = PathBuf::from(
        matches
            .get_one::<String>("manifest-dir")
            .expect("manifest-dir is required"),
    );
    let registry = crate::backend::registry(matches)?;
    let (artifacts, resolved, _) = compile_dir(&manifest_dir, registry).await?;

    let domains: Vec<String> = resolved
        .chain
        .iter()
        .filter(|level| level.scope.as_deref() == Some("domain"))
        .map(|level| level.name.clone())
        .collect();

    Ok(generate(
        &resolved.security(),
        &domains,
        &artifacts.metadata.source_hash,
    ))
}

pub(crate) async fn generate_cmd(matches: &ArgMatches) -> Result<(), CliError> {
    let manifests = generate_from_dir(matches).await?;
    let output_dir = matches
        .get_one::<String>("output-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("target/network"));
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", output_dir.display()))?;

    // one YAML per (namespace, kind), multi-document within the file
    for (namespace, objects) in &manifests.objects {
        let mut kinds: Vec<&'static str> = Vec::new();
        for object in objects {
            if !kinds.contains(&object.kind()) {
                kinds.push(object.kind());
            }
        }
        for kind in kinds {
            let documents: Vec<String> = objects
                .iter()
                .filter(|object| object.kind() == kind)
                .map(|object| object.to_yaml())
                .collect::<Result<_, _>>()
                .map_err(|e| anyhow::anyhow!("cannot serialize {namespace}/{kind}: {e}"))?;
            let path = output_dir.join(format!("{namespace}-{}.yaml", kind.to_lowercase()));
            std::fs::write(&path, documents.join("---\n"))
                .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", path.display()))?;
            println!("wrote {}", path.display());
        }
    }

    let security_context_path = output_dir.join("jobs-pod-security.yaml");
    let security_context = serde_yaml::to_string(&manifests.jobs_pod_security)
        .map_err(|e| anyhow::anyhow!("cannot serialize the jobs security context: {e}"))?;
    std::fs::write(&security_context_path, security_context)
        .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", security_context_path.display()))?;
    println!("wrote {}", security_context_path.display());

    let summary_path = output_dir.join("SUMMARY.md");
    std::fs::write(&summary_path, &manifests.summary)
        .map_err(|e| anyhow::anyhow!("cannot write {}: {e}", summary_path.display()))?;
    println!("wrote {}", summary_path.display());

    info!(output = %output_dir.display(), "network manifests generated");
    Ok(())
}

pub(crate) async fn validate_cmd(matches: &ArgMatches) -> Result<(), CliError> {
    let manifests = generate_from_dir(matches).await?;
    validate(&manifests)?;
    println!("Generated manifests are valid");
    Ok(())
}
