//! Error types for pullbox

use thiserror::Error;

pub use pullbox_oci::RegistryError;

/// Result type alias using pullbox Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a pull. None of them are retried.
#[derive(Error, Debug)]
pub enum Error {
    /// Token, manifest, platform or blob failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Platform argument is not `os/arch`
    #[error("invalid platform {0:?}: expected os/arch")]
    InvalidPlatform(String),

    /// Image argument cannot be turned into a repository and tag
    #[error("invalid image name {0:?}")]
    InvalidImage(String),

    /// Writing the output archive failed
    #[error("archive error: {0}")]
    Archive(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
