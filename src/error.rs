use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Unknown domain: {0}")]
    UnknownDomain(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Capability '{capability}' is claimed by more than one handler: {handlers:?}")]
    AssignmentConflict {
        capability: String,
        handlers: Vec<String>,
    },

    #[error("Delegation cycle for capability '{capability}': {path:?}")]
    DelegationCycle {
        capability: String,
        path: Vec<String>,
    },

    #[error("Phase {phase} depends on phase {dependency}, which is not an earlier phase")]
    ForwardDependency { phase: usize, dependency: usize },

    #[error("Plan contains a dependency cycle at phase: {0}")]
    PlanCycle(String),

    #[error("Context lookup failed: {0}")]
    Lookup(String),

    #[error("Reasoning service failed: {0}")]
    Reasoning(String),
}

pub type Result<T> = std::result::Result<T, Error>;
