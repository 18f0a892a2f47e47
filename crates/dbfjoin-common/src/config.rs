//! Configuration structures for dbfjoin.

use crate::error::{JoinError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default paged window size in bytes (64 MB).
pub const DEFAULT_WINDOW_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for a joined dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Directory scanned for secondary attribute files.
    pub directory: PathBuf,
    /// File extension of secondary files, matched case-insensitively.
    pub extension: String,
    /// Name of the join key field, matched case-insensitively.
    pub join_field: String,
    /// Whether an implicitly added join key is visible in query output.
    pub key_projection: KeyProjection,
    /// Settings for opening record files.
    pub storage: StorageConfig,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            extension: "dbf".to_string(),
            join_field: String::new(),
            key_projection: KeyProjection::Hide,
            storage: StorageConfig::default(),
        }
    }
}

impl JoinConfig {
    /// Creates a configuration for the given directory and join field.
    pub fn new(directory: impl Into<PathBuf>, join_field: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            join_field: join_field.into(),
            ..Default::default()
        }
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.join_field.trim().is_empty() {
            return Err(JoinError::ConfigError("join_field is empty".to_string()));
        }
        if self.extension.trim().is_empty() {
            return Err(JoinError::ConfigError("extension is empty".to_string()));
        }
        self.storage.validate()
    }
}

/// Settings for opening record files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum bytes held in the paged window over the record area.
    pub window_size: usize,
    /// Map the window with mmap instead of reading it into an owned buffer.
    pub use_memory_map: bool,
    /// Character set of string fields.
    pub charset: Charset,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            use_memory_map: true,
            charset: Charset::Utf8,
        }
    }
}

impl StorageConfig {
    /// Checks the storage settings.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(JoinError::InvalidParameter {
                name: "window_size".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Visibility of the join key when a query did not request it but the join
/// needs it to drive secondary lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyProjection {
    /// Read the key internally, drop it from the output.
    #[default]
    Hide,
    /// Append the key to the output after the requested attributes.
    Expose,
}

/// Character set used to decode string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Charset {
    /// Strict UTF-8; invalid bytes are a decode error.
    #[default]
    Utf8,
    /// ISO-8859-1; every byte maps to one code point.
    Latin1,
}
