//! Row stream capability shared by primary sources and the joined reader.

use dbfjoin_common::{AttributeDescriptor, JoinError, Result, Value};
use dbfjoin_storage::RecordFile;
use std::sync::Arc;

/// A forward-only cursor over rows of typed attributes.
///
/// `read` addresses attributes by position within this stream, not within
/// whatever backs it.
pub trait AttributeStream {
    /// Moves to the next row. Returns false once the stream is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// Decodes attribute `index` of the current row.
    fn read(&self, index: usize) -> Result<Value>;

    /// Returns the number of attributes per row.
    fn attribute_count(&self) -> usize;

    /// Returns the name and type of attribute `index`.
    fn attribute_descriptor(&self, index: usize) -> Result<&AttributeDescriptor>;

    /// Releases every resource held by the stream. Idempotent.
    fn close(&mut self) -> Result<()>;
}

impl<S: AttributeStream + ?Sized> AttributeStream for Box<S> {
    fn advance(&mut self) -> Result<bool> {
        (**self).advance()
    }

    fn read(&self, index: usize) -> Result<Value> {
        (**self).read(index)
    }

    fn attribute_count(&self) -> usize {
        (**self).attribute_count()
    }

    fn attribute_descriptor(&self, index: usize) -> Result<&AttributeDescriptor> {
        (**self).attribute_descriptor(index)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

fn attribute_out_of_range(index: usize, count: usize) -> JoinError {
    JoinError::FieldOutOfRange {
        index,
        field_count: count,
    }
}

/// Stream over a record file, exposing a subset of its fields.
#[derive(Debug)]
pub struct RecordFileStream {
    file: RecordFile,
    /// File field position of each exposed attribute.
    columns: Vec<usize>,
    attributes: Vec<AttributeDescriptor>,
}

impl RecordFileStream {
    /// Exposes every field of `file` in file order.
    pub fn new(file: RecordFile) -> Self {
        let attributes = file
            .header()
            .fields()
            .iter()
            .map(|f| AttributeDescriptor::new(&f.name, f.value_type()))
            .collect();
        let columns = (0..file.header().field_count()).collect();
        Self {
            file,
            columns,
            attributes,
        }
    }

    /// Exposes the fields at `columns`, in that order.
    pub fn with_columns(file: RecordFile, columns: &[usize]) -> Result<Self> {
        let header = Arc::clone(file.header());
        let attributes = columns
            .iter()
            .map(|&c| {
                let field = header.field(c)?;
                Ok(AttributeDescriptor::new(&field.name, field.value_type()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            file,
            columns: columns.to_vec(),
            attributes,
        })
    }

    /// Returns the underlying file.
    pub fn file(&self) -> &RecordFile {
        &self.file
    }
}

impl AttributeStream for RecordFileStream {
    fn advance(&mut self) -> Result<bool> {
        self.file.advance()
    }

    fn read(&self, index: usize) -> Result<Value> {
        let column = *self
            .columns
            .get(index)
            .ok_or_else(|| attribute_out_of_range(index, self.columns.len()))?;
        self.file.read_field(column)
    }

    fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    fn attribute_descriptor(&self, index: usize) -> Result<&AttributeDescriptor> {
        self.attributes
            .get(index)
            .ok_or_else(|| attribute_out_of_range(index, self.attributes.len()))
    }

    fn close(&mut self) -> Result<()> {
        self.file.close()
    }
}

/// Stream over rows already held in memory.
#[derive(Debug, Clone)]
pub struct VecStream {
    attributes: Vec<AttributeDescriptor>,
    /// Row storage position of each exposed attribute.
    columns: Vec<usize>,
    rows: Arc<Vec<Vec<Value>>>,
    /// Index of the current row; None before the first advance.
    position: Option<usize>,
    closed: bool,
}

impl VecStream {
    /// Creates a stream exposing every column of `rows`.
    pub fn new(attributes: Vec<AttributeDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        let columns = (0..attributes.len()).collect();
        Self {
            attributes,
            columns,
            rows: Arc::new(rows),
            position: None,
            closed: false,
        }
    }

    /// Creates a stream exposing `columns` of shared rows, in that order.
    pub fn projected(
        attributes: &[AttributeDescriptor],
        rows: Arc<Vec<Vec<Value>>>,
        columns: &[usize],
    ) -> Result<Self> {
        let projected = columns
            .iter()
            .map(|&c| {
                attributes
                    .get(c)
                    .cloned()
                    .ok_or_else(|| attribute_out_of_range(c, attributes.len()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            attributes: projected,
            columns: columns.to_vec(),
            rows,
            position: None,
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl AttributeStream for VecStream {
    fn advance(&mut self) -> Result<bool> {
        if self.closed {
            return Err(JoinError::UseAfterClose);
        }
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read(&self, index: usize) -> Result<Value> {
        if self.closed {
            return Err(JoinError::UseAfterClose);
        }
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| JoinError::IllegalState("read before advance".to_string()))?;
        let column = *self
            .columns
            .get(index)
            .ok_or_else(|| attribute_out_of_range(index, self.columns.len()))?;
        Ok(row.get(column).cloned().unwrap_or(Value::Null))
    }

    fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    fn attribute_descriptor(&self, index: usize) -> Result<&AttributeDescriptor> {
        self.attributes
            .get(index)
            .ok_or_else(|| attribute_out_of_range(index, self.attributes.len()))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
