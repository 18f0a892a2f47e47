//! Value to record-number index over one field of a record file.

use crate::record_file::RecordFile;
use dbfjoin_common::{JoinError, Result, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Selects the field an index is built on.
#[derive(Debug, Clone, Copy)]
pub enum FieldSelector<'a> {
    /// Field name, matched case-insensitively.
    Name(&'a str),
    /// Zero-based field position.
    Position(usize),
}

/// Map from a field's decoded value to the one-based record holding it.
///
/// Built by one sequential scan and immutable afterwards, so it can be shared
/// between any number of handles over the same file through an `Arc`.
/// When a value occurs more than once, the last record wins.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    /// Name of the indexed field as declared in the file.
    field_name: String,
    /// Zero-based position of the indexed field.
    field_position: usize,
    /// Record count of the file the index was built from.
    record_count: u32,
    /// Normalized key to one-based record number.
    entries: HashMap<Value, u32>,
    /// Number of records whose key overwrote an earlier record's.
    duplicate_keys: u32,
    /// Number of records with a null key.
    null_keys: u32,
}

impl FieldIndex {
    /// Builds an index by scanning every record of `file`.
    ///
    /// The file is rewound first and left positioned on its last record.
    pub fn build(file: &mut RecordFile, selector: FieldSelector<'_>) -> Result<Self> {
        let header = Arc::clone(file.header());
        let field_position = match selector {
            FieldSelector::Name(name) => header
                .field_position(name)
                .ok_or_else(|| JoinError::FieldNotFound(format!(
                    "{} in {}",
                    name,
                    file.path().display()
                )))?,
            FieldSelector::Position(position) => {
                header.field(position)?;
                position
            }
        };
        let field_name = header.fields()[field_position].name.clone();

        file.rewind()?;
        let mut entries = HashMap::with_capacity(header.record_count as usize);
        let mut duplicate_keys = 0u32;
        let mut null_keys = 0u32;

        while file.advance()? {
            let record = file.current_record().unwrap_or_default();
            match file.read_field(field_position)?.normalized_key() {
                Some(key) => {
                    if entries.insert(key, record).is_some() {
                        duplicate_keys += 1;
                    }
                }
                None => null_keys += 1,
            }
        }

        if duplicate_keys > 0 {
            warn!(
                path = %file.path().display(),
                field = %field_name,
                duplicate_keys,
                "join field has non-unique values, only the last record per value is used"
            );
        }
        debug!(
            path = %file.path().display(),
            field = %field_name,
            entries = entries.len(),
            null_keys,
            "built field index"
        );

        Ok(Self {
            field_name,
            field_position,
            record_count: header.record_count,
            entries,
            duplicate_keys,
            null_keys,
        })
    }

    /// Returns the record number holding `value`, if any.
    pub fn lookup(&self, value: &Value) -> Option<u32> {
        let key = value.normalized_key()?;
        self.entries.get(&key).copied()
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the name of the indexed field.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Returns the position of the indexed field.
    pub fn field_position(&self) -> usize {
        self.field_position
    }

    /// Returns the record count of the file the index was built from.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Returns how many records repeated a key seen earlier in the scan.
    pub fn duplicate_keys(&self) -> u32 {
        self.duplicate_keys
    }

    /// Returns how many records had a null key and were not indexed.
    pub fn null_keys(&self) -> u32 {
        self.null_keys
    }

    /// Iterates over `(key, record)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, u32)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }
}

/// A record file paired with a shared index over its join field.
#[derive(Debug)]
pub struct IndexedRecordFile {
    /// Open file handle owned by this pair.
    file: RecordFile,
    /// Index shared with every other handle over the same file.
    index: Arc<FieldIndex>,
}

impl IndexedRecordFile {
    /// Builds a fresh index over `file` and pairs them.
    pub fn build(mut file: RecordFile, selector: FieldSelector<'_>) -> Result<Self> {
        let index = FieldIndex::build(&mut file, selector)?;
        Ok(Self {
            file,
            index: Arc::new(index),
        })
    }

    /// Pairs `file` with an index that was just built from this same handle.
    pub fn with_index(file: RecordFile, index: Arc<FieldIndex>) -> Self {
        Self { file, index }
    }

    /// Attaches a cached index that was built from the same physical file.
    ///
    /// The caller guarantees the file content is identical to the one the
    /// index was built from; the index is never rebuilt here.
    pub fn adopt(file: RecordFile, index: Arc<FieldIndex>) -> Result<Self> {
        if index.is_empty() {
            return Err(JoinError::InvalidIndex(format!(
                "index on {} is empty",
                index.field_name()
            )));
        }
        let record_count = file.record_count();
        if index.len() > record_count as usize {
            return Err(JoinError::InvalidIndex(format!(
                "index has {} keys but {} has {} records",
                index.len(),
                file.path().display(),
                record_count
            )));
        }
        if index.len() < record_count as usize {
            warn!(
                path = %file.path().display(),
                keys = index.len(),
                records = record_count,
                "adopted index has fewer keys than records"
            );
        }
        Ok(Self { file, index })
    }

    /// Returns the file handle.
    pub fn file(&self) -> &RecordFile {
        &self.file
    }

    /// Returns the file handle mutably.
    pub fn file_mut(&mut self) -> &mut RecordFile {
        &mut self.file
    }

    /// Returns the shared index.
    pub fn index(&self) -> &Arc<FieldIndex> {
        &self.index
    }

    /// Returns the path of the underlying file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Seeks to the record holding `value`. Returns false, leaving the cursor
    /// where it was, when no record holds it.
    pub fn seek_to_value(&mut self, value: &Value) -> Result<bool> {
        match self.index.lookup(value) {
            Some(record) => {
                self.file.seek_to_record(record as i64)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes the file handle. The shared index is left untouched.
    pub fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}
