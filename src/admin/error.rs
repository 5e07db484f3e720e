use std::path::{Path, PathBuf};

use crate::types::StoreError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Input file not found at the specified path.
    #[error("input not found: {0}")]
    MissingInput(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Core store error.
    #[error(transparent)]
    Core(#[from] StoreError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_input(path: impl AsRef<Path>) -> Self {
        AdminError::MissingInput(path.as_ref().to_path_buf())
    }
}
