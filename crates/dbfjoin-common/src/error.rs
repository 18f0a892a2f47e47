//! Error types for dbfjoin.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using JoinError.
pub type Result<T> = std::result::Result<T, JoinError>;

/// Errors that can occur while reading or joining attribute files.
#[derive(Debug, Error)]
pub enum JoinError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File errors
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("File truncated: {}, reason: {reason}", path.display())]
    Truncated { path: PathBuf, reason: String },

    #[error("Bad header: {}, reason: {reason}", path.display())]
    BadHeader { path: PathBuf, reason: String },

    #[error("Unsupported encoding in {}: field {field} has type code {type_code:?}", path.display())]
    UnsupportedEncoding {
        path: PathBuf,
        field: String,
        type_code: char,
    },

    // Range errors
    #[error("Record {record} out of range (record count {record_count})")]
    RecordOutOfRange { record: i64, record_count: u32 },

    #[error("Field {index} out of range (field count {field_count})")]
    FieldOutOfRange { index: usize, field_count: usize },

    #[error("Decode error at record {record}, field {field}: {reason}")]
    Decode {
        record: u32,
        field: String,
        reason: String,
    },

    // Index errors
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    // Configuration errors
    #[error("No joinable sources on field {field} in {}", directory.display())]
    NoJoinableSources { field: String, directory: PathBuf },

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Unreadable: {}, reason: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // State errors
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Use after close")]
    UseAfterClose,
}

impl JoinError {
    /// Returns true for errors raised while validating configuration, before
    /// any row is read.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            JoinError::NoJoinableSources { .. }
                | JoinError::NotADirectory(_)
                | JoinError::Unreadable { .. }
                | JoinError::ConfigError(_)
                | JoinError::InvalidParameter { .. }
        )
    }
}
