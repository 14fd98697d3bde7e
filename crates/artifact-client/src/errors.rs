use thiserror::Error;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
pub type SigningResult<T> = std::result::Result<T, SigningError>;
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid OCI reference {0:?}")]
    InvalidReference(String),
    #[error("registry returned {status} for {reference}: {message}")]
    Server {
        status: u16,
        reference: String,
        message: String,
    },
    #[error("network error talking to the registry for {reference}: {message}")]
    Network { reference: String, message: String },
    #[error("artifact {reference} carries no compiled-artifacts layer")]
    MissingLayer { reference: String },
    #[error("artifact {reference} is malformed: {reason}")]
    Malformed { reference: String, reason: String },
    #[error("operation timed out after {seconds}s for {reference}")]
    Timeout { reference: String, seconds: u64 },
    #[error(transparent)]
    Schema(#[from] floe_compiler::errors::SchemaError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// 4xx responses are never retried; network failures and 5xx are.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Network { .. } => true,
            RegistryError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("cannot acquire OIDC token: {0}")]
    Oidc(String),
    #[error("fulcio refused to issue a certificate: {0}")]
    Fulcio(String),
    #[error("rekor transparency log error: {0}")]
    Rekor(String),
    #[error("cannot resolve signing key from secret {name:?}: {reason}")]
    SecretResolution { name: String, reason: String },
    #[error("signing key material is invalid: {0}")]
    InvalidKey(String),
    #[error("cannot encode signature bundle: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("signature verification failed for {reference}: {reasons:?}")]
    SignatureVerification {
        reference: String,
        reasons: Vec<String>,
    },
    #[error("verification policy is invalid: {0}")]
    InvalidPolicy(String),
    #[error("cannot read verification policy: {0}")]
    PolicyIo(#[from] std::io::Error),
    #[error("cannot parse verification policy: {0}")]
    PolicyParse(#[from] serde_yaml::Error),
    #[error("offline bundle is malformed: {0}")]
    MalformedBundle(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
