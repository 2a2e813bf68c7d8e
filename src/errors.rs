use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a tag sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    #[error("Failed to fetch tags: {0}")]
    Fetch(String),

    #[error("Malformed upstream data: {0}")]
    MalformedUpstream(String),

    #[error("I/O error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed filters document {}: {reason}", path.display())]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("No filter group named \"{0}\" in the filters document")]
    MissingSection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
