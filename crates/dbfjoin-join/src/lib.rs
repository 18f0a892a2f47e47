//! Attribute joins between a primary stream and a directory of record files.
//!
//! This crate provides:
//! - The `AttributeStream` row capability and in-memory/file-backed streams
//! - Discovery of joinable files with memoized, shared field indexes
//! - Schema merging with per-attribute provenance
//! - A row-join reader decorating the primary stream
//! - Per-query planning that skips the join when it is not needed

mod dataset;
mod reader;
mod registry;
mod schema;
mod stream;

pub use dataset::{DbfPrimarySource, JoinedDataset, PrimarySource, QueryPlan, QueryRequest, VecSource};
pub use reader::{JoinedAttributeReader, ReaderState};
pub use registry::SourceRegistry;
pub use schema::{JoinAttributeDescriptor, JoinedSchema, Provenance, SourceId};
pub use stream::{AttributeStream, RecordFileStream, VecStream};
