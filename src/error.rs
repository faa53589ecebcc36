use thiserror::Error;

/// Main error type for dfd-atlas operations
#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid marker pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid ignore pattern: {0}")]
    IgnorePattern(#[from] ignore::Error),

    #[error("Source root does not exist or is not a directory: {0}")]
    RootNotFound(String),

    #[error("Group not found in the built graph: {0}")]
    GroupNotFound(String),

    #[error("Invalid level '{0}' (expected context, groups or detail:<groupId>)")]
    InvalidLevel(String),

    #[error("Deadline expired after {processed} of {total} source units; no partial graph produced")]
    DeadlineExceeded { processed: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, AtlasError>;
