use thiserror::Error;

/// Errors from skill descriptor parsing and validation.
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("invalid skill id '{0}': expected 'namespace/name'")]
    InvalidId(String),

    #[error("skill '{skill_id}' has invalid entrypoint '{entrypoint}': expected 'module:function'")]
    InvalidEntrypoint { skill_id: String, entrypoint: String },

    #[error("deprecated skill '{0}' must declare a reason or a replacement id")]
    DeprecationMetadata(String),

    #[error("skill not found: {0}")]
    NotFound(String),
}

/// Errors from repository operations (used by trait definitions in skillgate-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("record not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
