use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::ArgMatches;
use tracing::info;

use artifact_client::{
    export_bundle, ArtifactClient, EnvSecretResolver, FulcioRestClient, OidcProvider,
    OidcRestClientConfig, OidcRestProvider, RekorRestClient, SignatureStatus, SigningEngine,
    StaticTokenProvider, VerificationBundle,
};
use artifact_client::errors::VerifyError;
use floe_compiler::{CompiledArtifacts, SecretReference, SecretSource};

use crate::backend;
use crate::errors::CliError;

pub(crate) async fn push(matches: &ArgMatches) -> Result<(), CliError> {
    let path = matches.get_one::<String>("path").expect("path is required");
    let uri = matches.get_one::<String>("uri").expect("uri is required");

    let bytes = std::fs::read(Path::new(path))
        .map_err(|e| anyhow::anyhow!("cannot read {path}: {e}"))?;
    let artifacts = CompiledArtifacts::from_slice(&bytes)?;

    let registry = backend::registry(matches)?;
    let descriptor = registry.push(uri, &artifacts, BTreeMap::new()).await?;
    println!("Artifact successfully pushed");
    println!("{}@{}", descriptor.reference(), descriptor.digest);
    Ok(())
}

pub(crate) async fn pull(matches: &ArgMatches) -> Result<(), CliError> {
    let uri = matches.get_one::<String>("uri").expect("uri is required");
    let environment = matches.get_one::<String>("environment").map(String::as_str);
    let policy = backend::verification_policy(matches)?;

    let client = ArtifactClient::new(backend::registry(matches)?, backend::verifier()?);
    let pulled = client.pull(uri, &policy, environment).await?;

    let bytes = pulled
        .artifacts
        .to_canonical_json()
        .map_err(floe_compiler::errors::CompilationError::Serialize)?;
    match matches.get_one::<String>("output") {
        Some(output) => {
            std::fs::write(PathBuf::from(output), &bytes)
                .map_err(|e| anyhow::anyhow!("cannot write {output}: {e}"))?;
            println!("Artifact written to {output}");
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&bytes)
                .map_err(|e| anyhow::anyhow!("cannot write to stdout: {e}"))?;
        }
    }
    info!(
        reference = uri.as_str(),
        status = ?pulled.verification.status,
        digest = pulled.digest.as_str(),
        "artifact pulled"
    );
    Ok(())
}

pub(crate) async fn list(matches: &ArgMatches) -> Result<(), CliError> {
    let repository = matches
        .get_one::<String>("repository")
        .expect("repository is required");
    let limit = matches
        .get_one::<String>("limit")
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|e| anyhow::anyhow!("--limit must be a number: {e}"))
        })
        .transpose()?;

    let registry = backend::registry(matches)?;
    let descriptors = registry.list(repository, limit).await?;
    for descriptor in descriptors {
        println!("{}\t{}", descriptor.reference(), descriptor.digest);
    }
    Ok(())
}

pub(crate) async fn rm(matches: &ArgMatches) -> Result<(), CliError> {
    let uri = matches.get_one::<String>("uri").expect("uri is required");
    backend::registry(matches)?.delete(uri).await?;
    println!("Artifact removed");
    Ok(())
}

fn oidc_provider() -> Result<Arc<dyn OidcProvider>, CliError> {
    // CI injects a token; humans go through the device flow
    match StaticTokenProvider::from_env() {
        Ok(provider) => Ok(Arc::new(provider)),
        Err(_) => Ok(Arc::new(OidcRestProvider::new(OidcRestClientConfig {
            issuer_url: "https://oauth2.sigstore.dev/auth".to_string(),
            client_id: "sigstore".to_string(),
        })?)),
    }
}

pub(crate) async fn sign(matches: &ArgMatches) -> Result<(), CliError> {
    let uri = matches.get_one::<String>("uri").expect("uri is required");
    let registry = backend::registry(matches)?;

    let (manifest, _) = registry.manifest(uri).await?;
    let digest = artifact_client::Registry::content_digest(&manifest).ok_or_else(|| {
        anyhow::anyhow!("{uri} does not look like a compiled artifact")
    })?;

    let engine = SigningEngine::new(
        oidc_provider()?,
        Arc::new(FulcioRestClient::public_good()?),
        Arc::new(RekorRestClient::public_good()?),
    );

    let metadata = if matches.get_flag("keyless") {
        engine.sign_keyless(&digest).await?
    } else {
        let secret = matches.get_one::<String>("key").expect("clap group");
        let secret_ref = SecretReference {
            source: SecretSource::Env,
            name: secret.clone(),
            key: None,
        };
        engine
            .sign_with_key(
                &digest,
                &secret_ref,
                &EnvSecretResolver,
                matches.get_flag("rekor"),
            )
            .await?
    };

    let descriptor = registry.attach_signature(uri, &metadata).await?;
    println!("Artifact successfully signed");
    println!("subject: {}", metadata.subject);
    if let Some(index) = metadata.rekor_log_index {
        println!("rekor log index: {index}");
    }
    println!("{}@{}", descriptor.reference(), descriptor.digest);
    Ok(())
}

pub(crate) async fn verify(matches: &ArgMatches) -> Result<(), CliError> {
    let uri = matches.get_one::<String>("uri").expect("uri is required");
    let policy = backend::verification_policy(matches)?;
    let verifier = backend::verifier()?;

    let (status, reasons) = if let Some(bundle_path) = matches.get_one::<String>("bundle") {
        let bytes = std::fs::read(bundle_path)
            .map_err(|e| anyhow::anyhow!("cannot read {bundle_path}: {e}"))?;
        let bundle = VerificationBundle::from_json(&bytes)?;
        let result = verifier.verify_with_bundle(&bundle, &policy, None).await?;
        (result.status, result.reasons)
    } else {
        let registry = backend::registry(matches)?;
        let (manifest, _) = registry.manifest(uri).await?;
        let digest = artifact_client::Registry::content_digest(&manifest).ok_or_else(|| {
            anyhow::anyhow!("{uri} does not look like a compiled artifact")
        })?;
        let metadata =
            artifact_client::SignatureMetadata::from_annotations(&manifest.annotations)?;

        if let Some(export_path) = matches.get_one::<String>("export-bundle") {
            let metadata = metadata.as_ref().ok_or_else(|| {
                CliError::Verify(VerifyError::SignatureVerification {
                    reference: uri.to_string(),
                    reasons: vec!["cannot export a bundle for an unsigned artifact".to_string()],
                })
            })?;
            let bundle = export_bundle(&digest, metadata)?;
            std::fs::write(export_path, bundle.to_json()?)
                .map_err(|e| anyhow::anyhow!("cannot write {export_path}: {e}"))?;
            println!("Offline bundle written to {export_path}");
        }

        let environment = matches.get_one::<String>("environment").map(String::as_str);
        let result = verifier
            .verify(
                uri,
                &digest,
                metadata.as_ref(),
                &manifest.annotations,
                &policy,
                environment,
            )
            .await?;
        (result.status, result.reasons)
    };

    // the command contract is stricter than the policy: only VALID exits 0
    if status == SignatureStatus::Valid {
        println!("Artifact signature is valid");
        Ok(())
    } else {
        Err(CliError::Verify(VerifyError::SignatureVerification {
            reference: uri.to_string(),
            reasons: if reasons.is_empty() {
                vec![format!("signature status is {status:?}")]
            } else {
                reasons
            },
        }))
    }
}

pub(crate) async fn inspect(matches: &ArgMatches) -> Result<(), CliError> {
    let uri = matches.get_one::<String>("uri").expect("uri is required");
    let registry = backend::registry(matches)?;

    let (manifest, manifest_digest) = registry.manifest(uri).await?;
    let artifacts = registry.pull_content(uri, &manifest).await?;
    let metadata = artifact_client::SignatureMetadata::from_annotations(&manifest.annotations)?;

    println!("product:      {}", artifacts.identity.product_id);
    println!("version:      {}", artifacts.metadata.product_version);
    println!("mode:         {:?}", artifacts.mode);
    println!("source hash:  {}", artifacts.metadata.source_hash);
    println!("manifest:     {manifest_digest}");
    println!("compiled at:  {}", artifacts.metadata.compiled_at.to_rfc3339());
    if artifacts.inheritance_chain.is_empty() {
        println!("inheritance:  none");
    } else {
        println!("inheritance:");
        for level in &artifacts.inheritance_chain {
            println!(
                "  - {}@{} ({})",
                level.name,
                level.version,
                level.scope.as_deref().unwrap_or("unscoped")
            );
        }
    }
    match metadata {
        Some(metadata) => {
            println!("signature:    {} by {}", metadata.mode.as_str(), metadata.subject);
            if let Some(issuer) = &metadata.issuer {
                println!("issuer:       {issuer}");
            }
            if let Some(index) = metadata.rekor_log_index {
                println!("rekor index:  {index}");
            }
        }
        None => println!("signature:    unsigned"),
    }
    Ok(())
}
