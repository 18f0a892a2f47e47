//! dbfjoin common types, errors, and configuration.
//!
//! This crate provides shared definitions used by the storage and join layers.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Charset, JoinConfig, KeyProjection, StorageConfig};
pub use error::{JoinError, Result};
pub use types::{AttributeDescriptor, Value, ValueType};
