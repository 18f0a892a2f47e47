//! Row-join reader over a primary stream and indexed secondary files.

use crate::schema::{JoinAttributeDescriptor, Provenance, SourceId};
use crate::stream::AttributeStream;
use dbfjoin_common::{AttributeDescriptor, JoinError, Result, Value};
use dbfjoin_storage::{IndexedRecordFile, RecordRow};
use tracing::{trace, warn};

/// Lifecycle of a `JoinedAttributeReader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No row has been loaded yet.
    Ready,
    /// The current row's primary and secondary data are available.
    RowLoaded,
    /// Terminal. Every further call fails with `UseAfterClose`.
    Closed,
}

/// Where an output column is read from, resolved against opened handles.
#[derive(Debug, Clone, Copy)]
enum Column {
    Primary(usize),
    Secondary { slot: usize, field: usize },
}

/// An opened secondary source and its row for the current primary row.
#[derive(Debug)]
struct SecondarySlot {
    id: SourceId,
    source: IndexedRecordFile,
    /// Matched record, or None when the key has no match.
    row: Option<RecordRow>,
}

/// Decorates a primary stream with attributes joined from secondary files.
///
/// Each `advance` moves the primary stream, reads its join key and looks it up in
/// every opened secondary index. Matched records are copied so that
/// `read` never touches a secondary file.
#[derive(Debug)]
pub struct JoinedAttributeReader<P: AttributeStream> {
    primary: P,
    /// Position of the join key in the primary stream.
    key_position: usize,
    secondaries: Vec<SecondarySlot>,
    columns: Vec<Column>,
    attributes: Vec<AttributeDescriptor>,
    state: ReaderState,
    rows_read: u64,
}

impl<P: AttributeStream> JoinedAttributeReader<P> {
    /// Creates a reader.
    ///
    /// `output` lists the exposed attributes in order. Primary provenance
    /// indexes refer to positions in `primary`; secondary provenance must
    /// name a source present in `sources`.
    pub fn new(
        primary: P,
        key_position: usize,
        sources: Vec<(SourceId, IndexedRecordFile)>,
        output: &[JoinAttributeDescriptor],
    ) -> Result<Self> {
        let primary_count = primary.attribute_count();
        if key_position >= primary_count {
            return Err(JoinError::FieldOutOfRange {
                index: key_position,
                field_count: primary_count,
            });
        }

        let secondaries: Vec<SecondarySlot> = sources
            .into_iter()
            .map(|(id, source)| SecondarySlot {
                id,
                source,
                row: None,
            })
            .collect();

        let columns = output
            .iter()
            .map(|attribute| match attribute.provenance {
                Provenance::Primary { index } if index < primary_count => Ok(Column::Primary(index)),
                Provenance::Primary { index } => Err(JoinError::FieldOutOfRange {
                    index,
                    field_count: primary_count,
                }),
                Provenance::Secondary { source, field } => secondaries
                    .iter()
                    .position(|s| s.id == source)
                    .map(|slot| Column::Secondary { slot, field })
                    .ok_or_else(|| {
                        JoinError::IllegalState(format!(
                            "attribute {} needs secondary source {} which was not opened",
                            attribute.name, source.0
                        ))
                    }),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            primary,
            key_position,
            secondaries,
            columns,
            attributes: output.iter().map(|a| a.descriptor()).collect(),
            state: ReaderState::Ready,
            rows_read: 0,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Returns the number of primary rows advanced over.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Returns the number of opened secondary sources.
    pub fn source_count(&self) -> usize {
        self.secondaries.len()
    }

    /// Returns true if secondary source `id` matched the current row.
    pub fn has_match(&self, id: SourceId) -> bool {
        self.secondaries
            .iter()
            .any(|s| s.id == id && s.row.is_some())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Err(JoinError::UseAfterClose);
        }
        Ok(())
    }

    fn load_secondaries(&mut self) -> Result<()> {
        let key = self.primary.read(self.key_position)?;
        for slot in &mut self.secondaries {
            slot.row = if slot.source.seek_to_value(&key)? {
                Some(slot.source.file().read_row()?)
            } else {
                None
            };
        }
        trace!(row = self.rows_read, key = %key, "joined row");
        Ok(())
    }
}

impl<P: AttributeStream> AttributeStream for JoinedAttributeReader<P> {
    fn advance(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if !self.primary.advance()? {
            return Ok(false);
        }
        self.rows_read += 1;
        self.load_secondaries()?;
        self.state = ReaderState::RowLoaded;
        Ok(true)
    }

    fn read(&self, index: usize) -> Result<Value> {
        match self.state {
            ReaderState::Closed => return Err(JoinError::UseAfterClose),
            ReaderState::Ready => {
                return Err(JoinError::IllegalState("read before advance".to_string()));
            }
            ReaderState::RowLoaded => {}
        }

        let column = self
            .columns
            .get(index)
            .ok_or(JoinError::FieldOutOfRange {
                index,
                field_count: self.columns.len(),
            })?;
        match *column {
            Column::Primary(position) => self.primary.read(position),
            Column::Secondary { slot, field } => match &self.secondaries[slot].row {
                Some(row) => row.read(field),
                None => Ok(Value::Null),
            },
        }
    }

    fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    fn attribute_descriptor(&self, index: usize) -> Result<&AttributeDescriptor> {
        self.attributes.get(index).ok_or(JoinError::FieldOutOfRange {
            index,
            field_count: self.attributes.len(),
        })
    }

    /// Closes the primary stream and every secondary handle. Shared indexes
    /// are left alone. Every handle is closed even if an earlier one fails;
    /// the first failure is returned.
    fn close(&mut self) -> Result<()> {
        if self.state == ReaderState::Closed {
            return Ok(());
        }
        self.state = ReaderState::Closed;

        let mut first_error = self.primary.close().err();
        for slot in &mut self.secondaries {
            slot.row = None;
            if let Err(e) = slot.source.close() {
                warn!(path = %slot.source.path().display(), error = %e, "failed to close secondary source");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<P: AttributeStream> Drop for JoinedAttributeReader<P> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
