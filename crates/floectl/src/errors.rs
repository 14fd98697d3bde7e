use artifact_client::errors::{RegistryError, SigningError, VerifyError};
use floe_compiler::errors::PipelineError;
use k8s_gen::NetworkValidationError;
use thiserror::Error;

/// Everything a command can fail with, mapped onto the stable exit codes:
/// 1 schema, 2 inheritance, 3 compile, 4 registry, 5 network validation,
/// 6 signature verification, 7 signing.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    NetworkValidation(#[from] NetworkValidationError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Pipeline(PipelineError::Schema(_)) => 1,
            CliError::Pipeline(PipelineError::Inheritance(_)) => 2,
            CliError::Pipeline(PipelineError::Compilation(_)) => 3,
            CliError::Registry(_) => 4,
            CliError::NetworkValidation(_) => 5,
            CliError::Verify(VerifyError::SignatureVerification { .. }) => 6,
            CliError::Verify(VerifyError::Registry(_)) => 4,
            CliError::Verify(_) => 1,
            CliError::Signing(_) => 7,
            CliError::Other(_) => 1,
        }
    }
}

impl From<floe_compiler::errors::SchemaError> for CliError {
    fn from(error: floe_compiler::errors::SchemaError) -> Self {
        CliError::Pipeline(PipelineError::Schema(error))
    }
}

impl From<floe_compiler::errors::InheritanceError> for CliError {
    fn from(error: floe_compiler::errors::InheritanceError) -> Self {
        CliError::Pipeline(PipelineError::Inheritance(error))
    }
}

impl From<floe_compiler::errors::CompilationError> for CliError {
    fn from(error: floe_compiler::errors::CompilationError) -> Self {
        CliError::Pipeline(PipelineError::Compilation(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use floe_compiler::errors::SchemaError;

    #[test]
    fn exit_codes_follow_the_contract() {
        let schema: CliError = SchemaError::invalid("kind", "nope").into();
        assert_eq!(schema.exit_code(), 1);

        let inheritance: CliError =
            floe_compiler::errors::InheritanceError::DepthExceeded { max: 5 }.into();
        assert_eq!(inheritance.exit_code(), 2);

        let compile: CliError = floe_compiler::errors::CompilationError::NoDefaultCompute {
            transform: "t".to_string(),
        }
        .into();
        assert_eq!(compile.exit_code(), 3);

        let registry: CliError = RegistryError::InvalidReference("x".to_string()).into();
        assert_eq!(registry.exit_code(), 4);

        let verification: CliError = VerifyError::SignatureVerification {
            reference: "r".to_string(),
            reasons: vec![],
        }
        .into();
        assert_eq!(verification.exit_code(), 6);

        let signing: CliError = SigningError::Oidc("nope".to_string()).into();
        assert_eq!(signing.exit_code(), 7);
    }
}
