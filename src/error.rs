use std::path::PathBuf;

use thiserror::Error;

use crate::access::ValidationError;

#[derive(Error, Debug)]
pub enum PbacError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid policy file {}: {source}", .path.display())]
    PolicyFile {
        path: PathBuf,
        #[source]
        source: Box<PbacError>,
    },

    #[error("Unsupported policy format: {} (expected .json or .toml)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PbacError>;
