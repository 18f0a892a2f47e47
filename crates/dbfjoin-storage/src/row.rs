//! Buffered copy of one record.

use crate::decode::decode_field;
use crate::header::{RECORD_DELETED, RecordFileHeader};
use bytes::Bytes;
use dbfjoin_common::{Charset, JoinError, Result, Value};
use std::sync::Arc;

/// A record copied out of its file.
///
/// Holds the raw record bytes and the header needed to decode them, so fields
/// can be read after the file has moved on to another record or been closed.
#[derive(Debug, Clone)]
pub struct RecordRow {
    /// One-based record number this row was copied from.
    record: u32,
    /// Raw record bytes, deletion flag included.
    data: Bytes,
    /// Header of the source file.
    header: Arc<RecordFileHeader>,
    /// Character set for string fields.
    charset: Charset,
}

impl RecordRow {
    /// Creates a row from raw record bytes.
    pub fn new(record: u32, data: Bytes, header: Arc<RecordFileHeader>, charset: Charset) -> Self {
        Self {
            record,
            data,
            header,
            charset,
        }
    }

    /// Returns the one-based record number.
    pub fn record_number(&self) -> u32 {
        self.record
    }

    /// Returns true if the record carries the deletion flag.
    pub fn is_deleted(&self) -> bool {
        self.data.first() == Some(&RECORD_DELETED)
    }

    /// Decodes the field at `index`.
    pub fn read(&self, index: usize) -> Result<Value> {
        decode_slot(&self.header, &self.data, self.record, index, self.charset)
    }

    /// Decodes every field in file order.
    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.header.field_count()).map(|i| self.read(i)).collect()
    }
}

/// Decodes field `index` out of the raw bytes of record `record`.
pub(crate) fn decode_slot(
    header: &RecordFileHeader,
    data: &[u8],
    record: u32,
    index: usize,
    charset: Charset,
) -> Result<Value> {
    let field = header.field(index)?;
    let end = field.offset + field.width as usize;
    let raw = data.get(field.offset..end).ok_or_else(|| JoinError::Decode {
        record,
        field: field.name.clone(),
        reason: format!("record has {} bytes, field ends at {}", data.len(), end),
    })?;
    decode_field(field, raw, charset).map_err(|reason| JoinError::Decode {
        record,
        field: field.name.clone(),
        reason,
    })
}
