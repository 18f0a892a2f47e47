//! Random-access reader over a fixed-record attribute file.

use crate::header::{RECORD_DELETED, RecordFileHeader, open_file};
use crate::row::{RecordRow, decode_slot};
use crate::window::{PageWindow, window_bounds};
use bytes::Bytes;
use dbfjoin_common::{JoinError, Result, StorageConfig, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Reader over one fixed-record file.
///
/// The cursor addresses one record at a time. `seek_to_record` jumps anywhere
/// in the file; `advance` steps forward. Record bytes are served from a paged
/// window that is rebased when the cursor leaves it.
pub struct RecordFile {
    /// Path the file was opened from.
    path: PathBuf,
    /// Parsed header, shared with rows copied out of this file.
    header: Arc<RecordFileHeader>,
    /// Window and decode settings.
    config: StorageConfig,
    /// File handle, None once closed.
    file: Option<File>,
    /// Current window over the record area.
    window: Option<PageWindow>,
    /// Current one-based record number, 0 before the first record.
    cursor: u32,
    /// Number of window loads, for diagnostics.
    window_loads: u64,
}

impl RecordFile {
    /// Opens a file with default storage settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &StorageConfig::default())
    }

    /// Opens a file and parses its header.
    pub fn open_with(path: impl AsRef<Path>, config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let mut file = open_file(path)?;
        let file_len = file.metadata()?.len();
        let header = RecordFileHeader::read(&mut file, path)?;
        header.validate_length(path, file_len)?;

        trace!(
            path = %path.display(),
            records = header.record_count,
            fields = header.field_count(),
            "opened record file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header: Arc::new(header),
            config: config.clone(),
            file: Some(file),
            window: None,
            cursor: 0,
            window_loads: 0,
        })
    }

    /// Returns the path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the parsed header.
    pub fn header(&self) -> &Arc<RecordFileHeader> {
        &self.header
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    /// Returns the current one-based record number, if a record is current.
    pub fn current_record(&self) -> Option<u32> {
        (self.cursor > 0).then_some(self.cursor)
    }

    /// Returns how many times a window has been loaded.
    pub fn window_loads(&self) -> u64 {
        self.window_loads
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Makes record `n` (one-based) current.
    pub fn seek_to_record(&mut self, n: i64) -> Result<()> {
        self.ensure_open()?;
        let n = self.header.check_record(n)?;
        self.load_window_for(n)?;
        self.cursor = n;
        Ok(())
    }

    /// Positions the cursor before the first record.
    pub fn rewind(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.cursor = 0;
        Ok(())
    }

    /// Returns true if `advance` would move to another record.
    pub fn has_next(&self) -> bool {
        self.file.is_some() && self.cursor < self.header.record_count
    }

    /// Moves to the next record. Returns false, without moving, when the
    /// current record is the last one.
    pub fn advance(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if self.cursor >= self.header.record_count {
            return Ok(false);
        }
        let next = self.cursor + 1;
        self.load_window_for(next)?;
        self.cursor = next;
        Ok(true)
    }

    /// Decodes field `index` of the current record.
    pub fn read_field(&self, index: usize) -> Result<Value> {
        let data = self.current_bytes()?;
        decode_slot(&self.header, data, self.cursor, index, self.config.charset)
    }

    /// Copies the current record into a row that outlives the cursor.
    pub fn read_row(&self) -> Result<RecordRow> {
        let data = self.current_bytes()?;
        Ok(RecordRow::new(
            self.cursor,
            Bytes::copy_from_slice(data),
            Arc::clone(&self.header),
            self.config.charset,
        ))
    }

    /// Returns true if the current record carries the deletion flag.
    pub fn is_deleted(&self) -> Result<bool> {
        Ok(self.current_bytes()?.first() == Some(&RECORD_DELETED))
    }

    /// Releases the window and the file handle. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_some() {
            trace!(path = %self.path.display(), "closing record file");
        }
        self.window = None;
        self.file = None;
        self.cursor = 0;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(JoinError::UseAfterClose);
        }
        Ok(())
    }

    /// Returns the raw bytes of the current record.
    fn current_bytes(&self) -> Result<&[u8]> {
        self.ensure_open()?;
        if self.cursor == 0 {
            return Err(JoinError::IllegalState(format!(
                "no current record in {}",
                self.path.display()
            )));
        }
        let offset = self.header.record_offset(self.cursor);
        let len = self.header.record_len as usize;
        self.window
            .as_ref()
            .and_then(|w| w.slice(offset, len))
            .ok_or_else(|| self.straddle_error(self.cursor))
    }

    /// Makes sure record `n` lies entirely inside the window, rebasing the
    /// window if it does not.
    fn load_window_for(&mut self, n: u32) -> Result<()> {
        let offset = self.header.record_offset(n);
        let len = self.header.record_len as usize;

        if let Some(window) = &self.window
            && window.contains(offset, len)
        {
            return Ok(());
        }

        // Release the old window before mapping a new one.
        self.window = None;

        let (start, size) = window_bounds(
            offset,
            len,
            self.header.header_len as u64,
            self.header.data_end(),
            self.config.window_size,
        );
        let file = self.file.as_mut().ok_or(JoinError::UseAfterClose)?;
        let window = PageWindow::load(file, start, size, self.config.use_memory_map)?;
        self.window_loads += 1;

        trace!(
            path = %self.path.display(),
            record = n,
            start,
            size,
            "rebased window"
        );

        if !window.contains(offset, len) {
            return Err(self.straddle_error(n));
        }
        self.window = Some(window);
        Ok(())
    }

    fn straddle_error(&self, n: u32) -> JoinError {
        JoinError::Truncated {
            path: self.path.clone(),
            reason: format!("record {} not fully contained in the loaded window", n),
        }
    }
}

impl Drop for RecordFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("path", &self.path)
            .field("records", &self.header.record_count)
            .field("cursor", &self.cursor)
            .field("window", &self.window)
            .field("closed", &self.is_closed())
            .finish()
    }
}
