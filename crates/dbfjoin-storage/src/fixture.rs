//! In-memory writer for building record files in tests.
//!
//! Only available under `cfg(test)` or with the `fixture` feature.

use crate::header::{
    EOF_MARKER, FieldDescriptor, HEADER_TERMINATOR, RECORD_DELETED, RECORD_LIVE, RecordFileHeader,
};
use chrono::Datelike;
use dbfjoin_common::Value;
use std::io;
use std::path::Path;

/// Declaration of one field for `DbfWriter`.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub type_code: u8,
    pub width: u8,
    pub decimal_count: u8,
}

impl FieldSpec {
    /// Creates a field with an arbitrary type code.
    pub fn raw(name: &str, type_code: u8, width: u8, decimal_count: u8) -> Self {
        Self {
            name: name.to_string(),
            type_code,
            width,
            decimal_count,
        }
    }

    pub fn character(name: &str, width: u8) -> Self {
        Self::raw(name, b'C', width, 0)
    }

    pub fn numeric(name: &str, width: u8, decimal_count: u8) -> Self {
        Self::raw(name, b'N', width, decimal_count)
    }

    pub fn float(name: &str, width: u8, decimal_count: u8) -> Self {
        Self::raw(name, b'F', width, decimal_count)
    }

    pub fn logical(name: &str) -> Self {
        Self::raw(name, b'L', 1, 0)
    }

    pub fn date(name: &str) -> Self {
        Self::raw(name, b'D', 8, 0)
    }

    pub fn integer(name: &str) -> Self {
        Self::raw(name, b'I', 4, 0)
    }
}

/// Builds the bytes of a complete record file.
///
/// Rows shorter than the field list are padded with nulls.
#[derive(Debug, Clone)]
pub struct DbfWriter {
    fields: Vec<FieldSpec>,
    rows: Vec<(bool, Vec<Value>)>,
}

impl DbfWriter {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self {
            fields,
            rows: Vec::new(),
        }
    }

    /// Appends a live record.
    pub fn record(mut self, values: Vec<Value>) -> Self {
        self.rows.push((false, values));
        self
    }

    /// Appends a record carrying the deletion flag.
    pub fn deleted_record(mut self, values: Vec<Value>) -> Self {
        self.rows.push((true, values));
        self
    }

    /// Returns the number of records added so far.
    pub fn record_count(&self) -> usize {
        self.rows.len()
    }

    pub fn header_len(&self) -> usize {
        RecordFileHeader::SIZE + self.fields.len() * FieldDescriptor::SIZE + 1
    }

    pub fn record_len(&self) -> usize {
        1 + self.fields.iter().map(|f| f.width as usize).sum::<usize>()
    }

    /// Serializes the header, every record and the end marker.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len = self.header_len();
        let record_len = self.record_len();
        let mut buf = Vec::with_capacity(header_len + record_len * self.rows.len() + 1);

        // Prologue. Last update is fixed at 2024-01-01.
        buf.push(0x03);
        buf.extend_from_slice(&[124, 1, 1]);
        buf.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(header_len as u16).to_le_bytes());
        buf.extend_from_slice(&(record_len as u16).to_le_bytes());
        buf.resize(RecordFileHeader::SIZE, 0);

        for field in &self.fields {
            let mut descriptor = [0u8; FieldDescriptor::SIZE];
            let name = field.name.as_bytes();
            let n = name.len().min(10);
            descriptor[..n].copy_from_slice(&name[..n]);
            descriptor[11] = field.type_code;
            descriptor[16] = field.width;
            descriptor[17] = field.decimal_count;
            buf.extend_from_slice(&descriptor);
        }
        buf.push(HEADER_TERMINATOR);

        for (deleted, values) in &self.rows {
            buf.push(if *deleted { RECORD_DELETED } else { RECORD_LIVE });
            for (i, field) in self.fields.iter().enumerate() {
                let value = values.get(i).unwrap_or(&Value::Null);
                buf.extend_from_slice(&encode_slot(field, value));
            }
        }
        buf.push(EOF_MARKER);
        buf
    }

    /// Writes the file to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }
}

fn encode_slot(field: &FieldSpec, value: &Value) -> Vec<u8> {
    let width = field.width as usize;
    if field.type_code == b'I' {
        let n = value.as_i64().unwrap_or(0) as i32;
        return n.to_le_bytes().to_vec();
    }

    let text = match (field.type_code, value) {
        (_, Value::Null) => String::new(),
        (b'N' | b'F', Value::Integer(i)) if field.decimal_count == 0 => format!("{:>width$}", i),
        (b'N' | b'F', v) => {
            let d = v.as_f64().unwrap_or(0.0);
            format!("{:>width$.prec$}", d, prec = field.decimal_count as usize)
        }
        (b'L', Value::Boolean(true)) => "T".to_string(),
        (b'L', Value::Boolean(false)) => "F".to_string(),
        (b'D', Value::Date(date)) => {
            format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
        }
        (_, v) => v.to_string(),
    };

    let mut slot = text.into_bytes();
    if slot.len() > width {
        if matches!(field.type_code, b'N' | b'F') {
            return vec![b'*'; width];
        }
        slot.truncate(width);
    }
    if matches!(field.type_code, b'N' | b'F') {
        let mut padded = vec![b' '; width - slot.len()];
        padded.extend_from_slice(&slot);
        padded
    } else {
        slot.resize(width, b' ');
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let writer = DbfWriter::new(vec![
            FieldSpec::character("NAME", 4),
            FieldSpec::numeric("N", 5, 1),
        ])
        .record(vec![Value::from("ab"), Value::Double(2.5)]);
        let bytes = writer.to_bytes();

        assert_eq!(writer.header_len(), 32 + 64 + 1);
        assert_eq!(bytes.len(), writer.header_len() + writer.record_len() + 1);
        assert_eq!(bytes[writer.header_len() - 1], HEADER_TERMINATOR);
        assert_eq!(&bytes[writer.header_len()..writer.header_len() + 10], b" ab    2.5");
        assert_eq!(bytes.last(), Some(&EOF_MARKER));
    }

    #[test]
    fn test_missing_values_are_blank() {
        let bytes = DbfWriter::new(vec![FieldSpec::character("A", 2), FieldSpec::logical("B")])
            .record(vec![])
            .to_bytes();
        let start = 32 + 64 + 1;
        assert_eq!(&bytes[start..start + 4], b"    ");
    }

    #[test]
    fn test_numeric_overflow_fills_stars() {
        let bytes = DbfWriter::new(vec![FieldSpec::numeric("N", 3, 0)])
            .record(vec![Value::Integer(12345)])
            .to_bytes();
        let start = 32 + 32 + 1;
        assert_eq!(&bytes[start + 1..start + 4], b"***");
    }
}
