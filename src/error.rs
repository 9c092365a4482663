//! Error types for tessera.

use std::path::PathBuf;
use tessera_types::GeometryError;
use thiserror::Error;

/// Errors returned by every public tessera operation.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// Malformed geometry, mismatched bulk input, out-of-range zoom or bad configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// Missing object, or no database at the requested path.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// Structural mismatch or undecodable persisted data.
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Advisory; the operation was skipped and may be retried.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {context}: {message}")]
    Serialization { context: String, message: String },

    #[error("Database is closed")]
    DatabaseClosed,
}

impl TesseraError {
    /// True for caller mistakes (including geometry validation failures).
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            TesseraError::InvalidArgument(_) | TesseraError::Geometry(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TesseraError::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, TesseraError::Corruption(_))
    }

    pub(crate) fn serialization(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        TesseraError::Serialization {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
