//! dBASE header and field descriptor parsing.

use chrono::NaiveDate;
use dbfjoin_common::{JoinError, Result, ValueType};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Byte that ends the field descriptor table.
pub const HEADER_TERMINATOR: u8 = 0x0D;

/// Byte that marks the end of the record area.
pub const EOF_MARKER: u8 = 0x1A;

/// Deletion flag of a live record.
pub const RECORD_LIVE: u8 = b' ';

/// Deletion flag of a deleted record.
pub const RECORD_DELETED: u8 = b'*';

/// Storage type of a field, from its one-byte type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `C`: space padded text.
    Character,
    /// `N`: right-aligned ASCII number.
    Numeric,
    /// `F`: right-aligned ASCII floating-point number.
    Float,
    /// `L`: one-byte logical.
    Logical,
    /// `D`: `YYYYMMDD` date.
    Date,
    /// `I`: 4-byte little-endian signed integer.
    Integer,
}

impl FieldType {
    /// Maps a type code to a field type, or None if the code is unsupported.
    pub fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_uppercase() {
            b'C' => Some(FieldType::Character),
            b'N' => Some(FieldType::Numeric),
            b'F' => Some(FieldType::Float),
            b'L' => Some(FieldType::Logical),
            b'D' => Some(FieldType::Date),
            b'I' => Some(FieldType::Integer),
            _ => None,
        }
    }

    /// Returns the canonical type code.
    pub fn code(&self) -> u8 {
        match self {
            FieldType::Character => b'C',
            FieldType::Numeric => b'N',
            FieldType::Float => b'F',
            FieldType::Logical => b'L',
            FieldType::Date => b'D',
            FieldType::Integer => b'I',
        }
    }
}

/// One entry of the field descriptor table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name, NUL padding removed.
    pub name: String,
    /// Storage type.
    pub field_type: FieldType,
    /// Width in bytes within a record.
    pub width: u8,
    /// Number of digits after the decimal point.
    pub decimal_count: u8,
    /// Byte offset within a record, counting the deletion flag.
    pub offset: usize,
}

impl FieldDescriptor {
    /// Size of an on-disk field descriptor in bytes.
    pub const SIZE: usize = 32;

    /// Returns the logical type values of this field decode to.
    ///
    /// Numeric fields without decimals decode to integers unless they are
    /// too wide to fit an i64.
    pub fn value_type(&self) -> ValueType {
        match self.field_type {
            FieldType::Character => ValueType::String,
            FieldType::Numeric if self.decimal_count == 0 && self.width < 19 => {
                ValueType::Integer
            }
            FieldType::Numeric | FieldType::Float => ValueType::Double,
            FieldType::Logical => ValueType::Boolean,
            FieldType::Date => ValueType::Date,
            FieldType::Integer => ValueType::Integer,
        }
    }
}

/// Parsed header of a fixed-record attribute file.
///
/// Prologue layout (32 bytes):
/// - version: 1 byte
/// - last update: 3 bytes (years since 1900, month, day)
/// - record count: 4 bytes
/// - header length: 2 bytes
/// - record length: 2 bytes
/// - reserved: 17 bytes, language driver at byte 29
///
/// Followed by 32-byte field descriptors and a terminator byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFileHeader {
    /// Format version byte.
    pub version: u8,
    /// Date of last update, if the stored date is valid.
    pub last_update: Option<NaiveDate>,
    /// Number of records.
    pub record_count: u32,
    /// Length of the header block in bytes; records start here.
    pub header_len: u16,
    /// Length of one record in bytes, including the deletion flag.
    pub record_len: u16,
    /// Language driver id.
    pub language_driver: u8,
    /// Field descriptors in file order.
    fields: Vec<FieldDescriptor>,
}

impl RecordFileHeader {
    /// Size of the fixed prologue in bytes.
    pub const SIZE: usize = 32;

    /// Reads the header of the file at `path` without mapping any records.
    ///
    /// Also checks that the file is long enough to hold every declared record.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut file = open_file(path)?;
        let file_len = file.metadata()?.len();
        let header = Self::read(&mut file, path)?;
        header.validate_length(path, file_len)?;
        Ok(header)
    }

    /// Parses a header from the start of `reader`. `path` is used for errors.
    pub fn read<R: Read>(reader: &mut R, path: &Path) -> Result<Self> {
        let mut prologue = [0u8; Self::SIZE];
        read_exact_or_truncated(reader, &mut prologue, path, "header shorter than 32 bytes")?;

        let version = prologue[0];
        let last_update = NaiveDate::from_ymd_opt(
            1900 + prologue[1] as i32,
            prologue[2] as u32,
            prologue[3] as u32,
        );
        let record_count = u32::from_le_bytes([prologue[4], prologue[5], prologue[6], prologue[7]]);
        let header_len = u16::from_le_bytes([prologue[8], prologue[9]]);
        let record_len = u16::from_le_bytes([prologue[10], prologue[11]]);
        let language_driver = prologue[29];

        if (header_len as usize) < Self::SIZE + 1 {
            return Err(JoinError::BadHeader {
                path: path.to_path_buf(),
                reason: format!("header length {} too small", header_len),
            });
        }

        let max_fields = (header_len as usize - Self::SIZE - 1) / FieldDescriptor::SIZE;
        let mut fields = Vec::new();
        let mut offset = 1usize;
        let mut terminated = false;

        while fields.len() <= max_fields {
            let mut first = [0u8; 1];
            read_exact_or_truncated(reader, &mut first, path, "field table not terminated")?;
            if first[0] == HEADER_TERMINATOR {
                terminated = true;
                break;
            }

            let mut rest = [0u8; FieldDescriptor::SIZE - 1];
            read_exact_or_truncated(reader, &mut rest, path, "incomplete field descriptor")?;
            let mut raw = [0u8; FieldDescriptor::SIZE];
            raw[0] = first[0];
            raw[1..].copy_from_slice(&rest);

            let name_end = raw[..11].iter().position(|&b| b == 0).unwrap_or(11);
            let name = String::from_utf8_lossy(&raw[..name_end]).trim().to_string();
            let type_code = raw[11];
            let width = raw[16];
            let decimal_count = raw[17];

            let field_type =
                FieldType::from_code(type_code).ok_or_else(|| JoinError::UnsupportedEncoding {
                    path: path.to_path_buf(),
                    field: name.clone(),
                    type_code: type_code as char,
                })?;

            if field_type == FieldType::Integer && width != 4 {
                return Err(JoinError::BadHeader {
                    path: path.to_path_buf(),
                    reason: format!("integer field {} has width {}", name, width),
                });
            }

            fields.push(FieldDescriptor {
                name,
                field_type,
                width,
                decimal_count,
                offset,
            });
            offset += width as usize;
        }

        if !terminated {
            return Err(JoinError::BadHeader {
                path: path.to_path_buf(),
                reason: "field table exceeds header length".to_string(),
            });
        }

        if offset != record_len as usize {
            return Err(JoinError::BadHeader {
                path: path.to_path_buf(),
                reason: format!(
                    "record length {} does not match field widths {}",
                    record_len, offset
                ),
            });
        }

        Ok(Self {
            version,
            last_update,
            record_count,
            header_len,
            record_len,
            language_driver,
            fields,
        })
    }

    /// Checks that a file of `file_len` bytes holds every declared record.
    pub fn validate_length(&self, path: &Path, file_len: u64) -> Result<()> {
        let required = self.data_end();
        if file_len < required {
            return Err(JoinError::Truncated {
                path: path.to_path_buf(),
                reason: format!(
                    "{} records need {} bytes, file has {}",
                    self.record_count, required, file_len
                ),
            });
        }
        Ok(())
    }

    /// Returns the field descriptors in file order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Returns the number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns the descriptor at `index`.
    pub fn field(&self, index: usize) -> Result<&FieldDescriptor> {
        self.fields.get(index).ok_or(JoinError::FieldOutOfRange {
            index,
            field_count: self.fields.len(),
        })
    }

    /// Finds a field by case-insensitive name.
    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Returns the absolute file offset of the one-based record `n`.
    #[inline]
    pub fn record_offset(&self, n: u32) -> u64 {
        self.header_len as u64 + self.record_len as u64 * (n as u64 - 1)
    }

    /// Returns the absolute file offset where the record area ends.
    #[inline]
    pub fn data_end(&self) -> u64 {
        self.header_len as u64 + self.record_len as u64 * self.record_count as u64
    }

    /// Checks a one-based record number against the record count.
    pub fn check_record(&self, n: i64) -> Result<u32> {
        if n < 1 || n > self.record_count as i64 {
            return Err(JoinError::RecordOutOfRange {
                record: n,
                record_count: self.record_count,
            });
        }
        Ok(n as u32)
    }
}

/// Opens a file for reading, mapping a missing file to `FileNotFound`.
pub(crate) fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => JoinError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => JoinError::Io(e),
    })
}

fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    path: &Path,
    reason: &str,
) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => JoinError::Truncated {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        },
        _ => JoinError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{DbfWriter, FieldSpec};
    use dbfjoin_common::Value;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample() -> DbfWriter {
        DbfWriter::new(vec![
            FieldSpec::character("NAME", 12),
            FieldSpec::numeric("COMID", 9, 0),
            FieldSpec::numeric("AREA", 10, 3),
            FieldSpec::logical("ACTIVE"),
            FieldSpec::date("UPDATED"),
        ])
        .record(vec![
            Value::from("Fox River"),
            Value::Integer(1),
            Value::Double(2.5),
            Value::Boolean(true),
            Value::Null,
        ])
    }

    #[test]
    fn test_parse_header() {
        let bytes = sample().to_bytes();
        let header = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("mem")).unwrap();

        assert_eq!(header.record_count, 1);
        assert_eq!(header.field_count(), 5);
        assert_eq!(header.header_len as usize, 32 + 5 * 32 + 1);
        assert_eq!(header.record_len as usize, 1 + 12 + 9 + 10 + 1 + 8);

        let comid = header.field(1).unwrap();
        assert_eq!(comid.name, "COMID");
        assert_eq!(comid.field_type, FieldType::Numeric);
        assert_eq!(comid.offset, 13);
        assert_eq!(comid.value_type(), ValueType::Integer);
        assert_eq!(header.field(2).unwrap().value_type(), ValueType::Double);
        assert_eq!(header.field(3).unwrap().value_type(), ValueType::Boolean);
    }

    #[test]
    fn test_field_position_is_case_insensitive() {
        let bytes = sample().to_bytes();
        let header = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("mem")).unwrap();

        assert_eq!(header.field_position("comid"), Some(1));
        assert_eq!(header.field_position("Updated"), Some(4));
        assert_eq!(header.field_position("missing"), None);
    }

    #[test]
    fn test_record_offset() {
        let bytes = sample().to_bytes();
        let header = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("mem")).unwrap();

        assert_eq!(header.record_offset(1), header.header_len as u64);
        assert_eq!(header.data_end(), header.header_len as u64 + header.record_len as u64);
    }

    #[test]
    fn test_check_record_bounds() {
        let bytes = sample().to_bytes();
        let header = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("mem")).unwrap();

        assert_eq!(header.check_record(1).unwrap(), 1);
        assert!(matches!(
            header.check_record(0),
            Err(JoinError::RecordOutOfRange { record: 0, .. })
        ));
        assert!(matches!(
            header.check_record(2),
            Err(JoinError::RecordOutOfRange { record: 2, .. })
        ));
    }

    #[test]
    fn test_short_prologue_is_truncated() {
        let bytes = vec![0x03u8; 10];
        let result = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("short.dbf"));
        assert!(matches!(result, Err(JoinError::Truncated { .. })));
    }

    #[test]
    fn test_missing_terminator_is_truncated() {
        let bytes = sample().to_bytes();
        // Cut inside the descriptor table.
        let cut = &bytes[..32 + 40];
        let result = RecordFileHeader::read(&mut Cursor::new(cut), Path::new("cut.dbf"));
        assert!(matches!(result, Err(JoinError::Truncated { .. })));
    }

    #[test]
    fn test_unsupported_type_code() {
        let mut bytes = sample().to_bytes();
        // Type code of the first descriptor.
        bytes[32 + 11] = b'M';
        let result = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("memo.dbf"));
        match result {
            Err(JoinError::UnsupportedEncoding {
                field, type_code, ..
            }) => {
                assert_eq!(field, "NAME");
                assert_eq!(type_code, 'M');
            }
            other => panic!("expected UnsupportedEncoding, got {:?}", other),
        }
    }

    #[test]
    fn test_record_length_mismatch_is_bad_header() {
        let mut bytes = sample().to_bytes();
        bytes[10] = bytes[10].wrapping_add(1);
        let result = RecordFileHeader::read(&mut Cursor::new(&bytes), Path::new("bad.dbf"));
        assert!(matches!(result, Err(JoinError::BadHeader { .. })));
    }

    #[test]
    fn test_from_path_detects_truncated_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cut.dbf");
        let bytes = sample()
            .record(vec![Value::from("Rock"), Value::Integer(2)])
            .to_bytes();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();

        let result = RecordFileHeader::from_path(&path);
        assert!(matches!(result, Err(JoinError::Truncated { .. })));
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempdir().unwrap();
        let result = RecordFileHeader::from_path(&dir.path().join("nope.dbf"));
        assert!(matches!(result, Err(JoinError::FileNotFound { .. })));
    }

    #[test]
    fn test_field_type_codes() {
        for code in [b'C', b'N', b'F', b'L', b'D', b'I'] {
            let ty = FieldType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(FieldType::from_code(b'c'), Some(FieldType::Character));
        assert_eq!(FieldType::from_code(b'M'), None);
    }
}
