//! OCI artifact lifecycle for CompiledArtifacts: push, pull, list, delete,
//! plus Sigstore-style signing and policy-driven verification.
//!
//! Network collaborators (registry, OIDC issuer, Fulcio, Rekor) all sit
//! behind narrow traits so the whole lifecycle runs against in-memory or
//! directory-backed fakes in tests.

mod annotations;
mod audit;
mod bundle;
mod client;
pub mod errors;
mod registry;
mod sign;
mod sources;
mod verify;

pub use annotations::{
    SignatureMetadata, SignatureMode, BUNDLE_ANNOTATION, CERTIFICATE_FINGERPRINT_ANNOTATION,
    ISSUER_ANNOTATION, MODE_ANNOTATION, REKOR_LOG_INDEX_ANNOTATION, SBOM_ATTESTATION_ANNOTATION,
    SIGNATURE_PREFIX, SIGNED_AT_ANNOTATION, SUBJECT_ANNOTATION,
};
pub use audit::{AuditSink, VerificationAuditEvent};
pub use bundle::{export_bundle, VerificationBundle};
pub use client::{ArtifactClient, PulledArtifact};
pub use registry::config::{read_docker_config_json_file, DockerConfig, RegistryCredentials};
pub use registry::{
    ArtifactManifest, BlobDescriptor, Descriptor, DirectoryBackend, OciBackend, Registry,
    RegistryBackend, CONFIG_MEDIA_TYPE, DEFAULT_CONCURRENCY, LAYER_MEDIA_TYPE,
};
pub use sign::{
    CertificateMetadata, EnvSecretResolver, FulcioApi, FulcioRestClient, IdentityToken,
    OidcProvider, OidcRestClientConfig, OidcRestProvider, RekorApi, RekorEntry, RekorRestClient,
    SecretResolver, SignatureBundle, SigningEngine, StaticTokenProvider,
};
pub use sources::{read_sources_file, Sources};
pub use verify::{
    default_policy_yaml, read_policy_file, EnforcementMode, EnvironmentPolicy, SignatureStatus,
    TrustedIssuer, VerificationPolicy, VerificationResult, Verifier,
};
