use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The secure random source could not supply bytes.
    #[error("Secure random source failed")]
    InsufficientEntropy(#[source] rand::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The signing primitive rejected the key or the certificate template.
    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub(crate) fn signing(err: impl std::fmt::Display) -> Self {
        Self::Signing(err.to_string())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
