//! Paged window over the record area of a file.
//!
//! A `PageWindow` holds a bounded byte range `[start, start + len)` of a file,
//! either memory-mapped or read into an owned buffer. `RecordFile` keeps one
//! window at a time and replaces it when a record falls outside of it, so files
//! larger than the addressable span are read piecewise and offsets within the
//! window always fit in `usize`.

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Backing storage of a window.
enum WindowData {
    /// Read-only mapping of exactly the window's byte range.
    Mapped(Mmap),
    /// Owned copy filled by a positioned read.
    Buffered(Vec<u8>),
}

/// A bounded view over a byte range of a file.
pub struct PageWindow {
    /// Absolute file offset of the first byte in the window.
    start: u64,
    /// Window contents.
    data: WindowData,
}

impl PageWindow {
    /// Loads `len` bytes of `file` starting at `start`.
    pub fn load(file: &mut File, start: u64, len: usize, use_memory_map: bool) -> io::Result<Self> {
        let data = if use_memory_map {
            // SAFETY: Mmap::map is unsafe because the file may be modified by
            // another process while mapped. This is acceptable because:
            // 1. Attribute files are treated as immutable for the lifetime of a reader
            // 2. The mapping is read-only and never handed out beyond &self borrows
            // 3. The range [start, start + len) was checked against the file length
            //    by the caller before mapping
            let mmap = unsafe { MmapOptions::new().offset(start).len(len).map(&*file)? };
            WindowData::Mapped(mmap)
        } else {
            let mut buf = vec![0u8; len];
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut buf)?;
            WindowData::Buffered(buf)
        };

        Ok(Self { start, data })
    }

    /// Returns the absolute file offset of the first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Returns the number of bytes in the window.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// Returns true if the window holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the window is memory-mapped.
    pub fn is_mapped(&self) -> bool {
        matches!(self.data, WindowData::Mapped(_))
    }

    /// Returns true if `[offset, offset + len)` lies entirely in the window.
    #[inline]
    pub fn contains(&self, offset: u64, len: usize) -> bool {
        offset >= self.start && offset + len as u64 <= self.start + self.len() as u64
    }

    /// Returns the bytes of `[offset, offset + len)`, or None if any part of the
    /// range lies outside the window.
    #[inline]
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        if !self.contains(offset, len) {
            return None;
        }
        let begin = (offset - self.start) as usize;
        Some(&self.bytes()[begin..begin + len])
    }

    fn bytes(&self) -> &[u8] {
        match &self.data {
            WindowData::Mapped(mmap) => mmap,
            WindowData::Buffered(buf) => buf,
        }
    }
}

impl std::fmt::Debug for PageWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWindow")
            .field("start", &self.start)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Chooses the byte range of a window that must contain the record at
/// `record_offset`.
///
/// The window covers at most `window_size` bytes (never less than one record)
/// of the data area `[data_start, data_end)`. It starts at the record so that a
/// forward scan stays inside it, unless that would run past the end of the
/// data, in which case it is anchored to the end so backward jumps near the
/// tail do not trigger another rebase.
pub fn window_bounds(
    record_offset: u64,
    record_len: usize,
    data_start: u64,
    data_end: u64,
    window_size: usize,
) -> (u64, usize) {
    let size = window_size.max(record_len) as u64;
    let span = data_end - data_start;
    if span <= size {
        return (data_start, span as usize);
    }
    let start = if record_offset + size <= data_end {
        record_offset
    } else {
        data_end - size
    };
    (start, size as usize)
}
