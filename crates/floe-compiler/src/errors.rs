use thiserror::Error;

pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
pub type InheritanceResult<T> = std::result::Result<T, InheritanceError>;
pub type CompilationResult<T> = std::result::Result<T, CompilationError>;

/// Parse or structural validation failure, always anchored to a document path.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("cannot parse document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{path}: {reason}")]
    Invalid { path: String, reason: String },
    #[error("{path}: {value:?} does not match pattern {pattern}")]
    InvalidPattern {
        path: String,
        value: String,
        pattern: &'static str,
    },
    #[error("{path}: unknown field in security-sensitive section `{section}`")]
    UnknownField { path: String, section: String },
    #[error("{path}: {value} is not a valid semantic version")]
    InvalidVersion { path: String, value: String },
}

impl SchemaError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum InheritanceError {
    #[error("cannot load parent manifest {reference}: {reason}")]
    MissingParent { reference: String, reason: String },
    #[error("circular inheritance detected at {name}@{version}")]
    CircularInheritance { name: String, version: String },
    #[error("inheritance chain exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },
    #[error("invalid inheritance chain: {reason}")]
    InvalidChain { reason: String },
    #[error(
        "security policy violation on {field}: parent requires {parent:?}, child weakens to {child:?}"
    )]
    SecurityPolicyViolation {
        field: String,
        parent: String,
        child: String,
    },
    #[error("plugin {category}:{name} is not in the enterprise approved_plugins whitelist {approved:?}")]
    PluginNotApproved {
        category: String,
        name: String,
        approved: Vec<String>,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Invariant broken after resolution succeeded. All compilation errors are
/// fatal; no partial artifact is ever produced.
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("{path}: {reason}. {hint}")]
    Invariant {
        path: String,
        reason: String,
        hint: String,
    },
    #[error("compute registry default {default:?} is not defined in configs {configs:?}")]
    UnknownComputeDefault {
        default: String,
        configs: Vec<String>,
    },
    #[error("transform {transform}: compute {compute:?} is not defined in the compute registry")]
    UnknownTransformCompute { transform: String, compute: String },
    #[error("transform {transform}: no compute given and the registry has no default")]
    NoDefaultCompute { transform: String },
    #[error(transparent)]
    UnknownPlugin(#[from] UnknownPluginError),
    #[error("cannot serialize compiled artifacts: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
#[error("unknown {category} plugin {name:?}, available: {available:?}")]
pub struct UnknownPluginError {
    pub category: String,
    pub name: String,
    pub available: Vec<String>,
}

/// Everything the compile pipeline can fail with, in exit-code order.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Inheritance(#[from] InheritanceError),
    #[error(transparent)]
    Compilation(#[from] CompilationError),
}
