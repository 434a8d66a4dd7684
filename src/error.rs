//! Error types for StrataDB
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataDB operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    #[error("Database is shutting down")]
    ShuttingDown,
}

/// Coarse error classification, stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unknown,
    NotFound,
    CorruptedData,
    IoError,
    NotSupported,
    InvalidArgument,
}

impl StrataError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Io(_) => ErrorKind::IoError,
            StrataError::NotFound => ErrorKind::NotFound,
            StrataError::Corruption(_) | StrataError::Serialization(_) => ErrorKind::CorruptedData,
            StrataError::NotSupported(_) => ErrorKind::NotSupported,
            StrataError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StrataError::ShuttingDown => ErrorKind::Unknown,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StrataError::NotFound)
    }

    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::CorruptedData
    }

    /// Produce an equivalent error value.
    ///
    /// `std::io::Error` is not `Clone`, so a stored background error is
    /// rebuilt from its kind and message each time it is surfaced.
    pub fn duplicate(&self) -> StrataError {
        match self {
            StrataError::Io(e) => StrataError::Io(std::io::Error::new(e.kind(), e.to_string())),
            StrataError::NotFound => StrataError::NotFound,
            StrataError::Corruption(m) => StrataError::Corruption(m.clone()),
            StrataError::Serialization(m) => StrataError::Serialization(m.clone()),
            StrataError::NotSupported(m) => StrataError::NotSupported(m.clone()),
            StrataError::InvalidArgument(m) => StrataError::InvalidArgument(m.clone()),
            StrataError::ShuttingDown => StrataError::ShuttingDown,
        }
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}

impl From<snap::Error> for StrataError {
    fn from(e: snap::Error) -> Self {
        StrataError::Corruption(format!("snappy: {}", e))
    }
}
