//! Record file access for dbfjoin.
//!
//! This crate provides:
//! - dBASE header and field descriptor parsing
//! - Field decoding into typed values
//! - Paged windows over the record area, mapped or buffered
//! - Cursor-based record files with random access
//! - Value to record-number indexes over a single field

mod decode;
mod field_index;
mod header;
mod record_file;
mod row;
mod window;

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;

pub use decode::decode_field;
pub use field_index::{FieldIndex, FieldSelector, IndexedRecordFile};
pub use header::{
    EOF_MARKER, FieldDescriptor, FieldType, HEADER_TERMINATOR, RECORD_DELETED, RECORD_LIVE,
    RecordFileHeader,
};
pub use record_file::RecordFile;
pub use row::RecordRow;
pub use window::{PageWindow, window_bounds};
