//! Discovery of joinable files and memoized index construction.
//!
//! A `SourceRegistry` owns the index cache for one directory. Every physical
//! file gets at most one `FieldIndex` per join field, no matter how many
//! handles are opened over it or how many threads ask for it at once.

use dbfjoin_common::{JoinError, Result, StorageConfig};
use dbfjoin_storage::{FieldIndex, FieldSelector, IndexedRecordFile, RecordFile, RecordFileHeader};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Cache key: canonical path plus the lowercased join field.
type IndexKey = (PathBuf, String);

/// Cache slot for one file. Its own lock serializes construction so a second
/// caller waits for the first build instead of starting another.
#[derive(Default)]
struct IndexSlot {
    index: Mutex<Option<Arc<FieldIndex>>>,
}

/// Registry of secondary sources in one directory.
pub struct SourceRegistry {
    directory: PathBuf,
    config: StorageConfig,
    slots: Mutex<HashMap<IndexKey, Arc<IndexSlot>>>,
    index_builds: AtomicU64,
    files_opened: AtomicU64,
}

impl SourceRegistry {
    /// Creates a registry over `directory`. Nothing is read until `discover`.
    pub fn new(directory: impl Into<PathBuf>, config: StorageConfig) -> Self {
        Self {
            directory: directory.into(),
            config,
            slots: Mutex::new(HashMap::new()),
            index_builds: AtomicU64::new(0),
            files_opened: AtomicU64::new(0),
        }
    }

    /// Returns the directory this registry scans.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the storage options used for every opened file.
    pub fn storage_config(&self) -> &StorageConfig {
        &self.config
    }

    /// Lists files in the directory that can be joined on `join_field`.
    ///
    /// A file qualifies when its extension matches `extension`
    /// (case-insensitively), it has at least one record, and one of its fields
    /// is named `join_field` (case-insensitively). Only headers are read.
    /// Files that cannot be parsed are logged and skipped. The result is
    /// sorted by path.
    pub fn discover(&self, extension: &str, join_field: &str) -> Result<Vec<PathBuf>> {
        let directory = &self.directory;
        if !directory.is_dir() {
            return Err(JoinError::NotADirectory(directory.clone()));
        }

        let unreadable = |e: std::io::Error| JoinError::Unreadable {
            path: directory.clone(),
            reason: e.to_string(),
        };

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(directory).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            let matches_extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            if !matches_extension || !path.is_file() {
                continue;
            }

            let header = match RecordFileHeader::from_path(&path) {
                Ok(header) => header,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable attribute file");
                    continue;
                }
            };

            if header.record_count == 0 {
                debug!(path = %path.display(), "skipping empty attribute file");
                continue;
            }
            if header.field_position(join_field).is_none() {
                debug!(path = %path.display(), field = join_field, "skipping file without join field");
                continue;
            }
            candidates.push(path);
        }

        candidates.sort();
        debug!(
            directory = %directory.display(),
            candidates = candidates.len(),
            "discovered joinable files"
        );
        Ok(candidates)
    }

    /// Opens every candidate with its shared index on `join_field`.
    ///
    /// A file whose join field holds no values at all can never match a
    /// primary row. It is logged and skipped like any other unusable file.
    pub fn open_all(
        &self,
        candidates: &[PathBuf],
        join_field: &str,
    ) -> Result<Vec<IndexedRecordFile>> {
        let mut opened = Vec::with_capacity(candidates.len());
        for path in candidates {
            let (mut file, index, built) = self.open_indexed(path, join_field)?;
            if index.is_empty() {
                warn!(
                    path = %path.display(),
                    field = join_field,
                    null_keys = index.null_keys(),
                    "skipping attribute file without join keys"
                );
                file.close()?;
                continue;
            }
            opened.push(Self::pair(file, index, built)?);
        }

        if opened.is_empty() {
            return Err(JoinError::NoJoinableSources {
                field: join_field.to_string(),
                directory: self.directory.clone(),
            });
        }
        Ok(opened)
    }

    /// Opens one handle over `path`, building its index on first use and
    /// adopting the cached one afterwards.
    pub fn open_source(&self, path: &Path, join_field: &str) -> Result<IndexedRecordFile> {
        let (file, index, built) = self.open_indexed(path, join_field)?;
        Self::pair(file, index, built)
    }

    fn open_indexed(
        &self,
        path: &Path,
        join_field: &str,
    ) -> Result<(RecordFile, Arc<FieldIndex>, bool)> {
        let mut file = RecordFile::open_with(path, &self.config)?;
        self.files_opened.fetch_add(1, Ordering::Relaxed);
        let (index, built) = self.index_for(&mut file, join_field)?;
        Ok((file, index, built))
    }

    /// A cached index goes through `adopt`'s checks; one built from this
    /// handle is taken as is.
    fn pair(file: RecordFile, index: Arc<FieldIndex>, built: bool) -> Result<IndexedRecordFile> {
        if built {
            Ok(IndexedRecordFile::with_index(file, index))
        } else {
            IndexedRecordFile::adopt(file, index)
        }
    }

    /// Returns the shared index for `file`, building it if no other handle
    /// has. The flag is true when this call built it.
    fn index_for(
        &self,
        file: &mut RecordFile,
        join_field: &str,
    ) -> Result<(Arc<FieldIndex>, bool)> {
        let canonical = std::fs::canonicalize(file.path())?;
        let key = (canonical, join_field.to_ascii_lowercase());

        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key).or_default())
        };

        let mut entry = slot.index.lock();
        if let Some(index) = entry.as_ref() {
            return Ok((Arc::clone(index), false));
        }

        let index = Arc::new(FieldIndex::build(file, FieldSelector::Name(join_field))?);
        self.index_builds.fetch_add(1, Ordering::Relaxed);
        *entry = Some(Arc::clone(&index));
        Ok((index, true))
    }

    /// Returns how many indexes have been built.
    pub fn index_builds(&self) -> u64 {
        self.index_builds.load(Ordering::Relaxed)
    }

    /// Returns how many record files have been opened.
    pub fn files_opened(&self) -> u64 {
        self.files_opened.load(Ordering::Relaxed)
    }

    /// Returns how many distinct files have a cached index.
    pub fn cached_indexes(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.index.lock().is_some())
            .count()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("directory", &self.directory)
            .field("index_builds", &self.index_builds())
            .field("files_opened", &self.files_opened())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfjoin_common::Value;
    use dbfjoin_storage::fixture::{DbfWriter, FieldSpec};
    use std::thread;
    use tempfile::tempdir;

    fn write_keyed(path: &Path, field: &str, keys: &[i64]) {
        let mut writer = DbfWriter::new(vec![
            FieldSpec::numeric(field, 9, 0),
            FieldSpec::numeric("X", 6, 0),
        ]);
        for key in keys {
            writer = writer.record(vec![Value::Integer(*key), Value::Integer(key * 10)]);
        }
        writer.write(path).unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempdir().unwrap();
        write_keyed(&dir.path().join("b.dbf"), "COMID", &[1]);
        write_keyed(&dir.path().join("a.DBF"), "comid", &[2]);
        write_keyed(&dir.path().join("other.dbf"), "HUC8", &[3]);
        write_keyed(&dir.path().join("empty.dbf"), "COMID", &[]);
        write_keyed(&dir.path().join("c.txt"), "COMID", &[4]);

        let registry = SourceRegistry::new(dir.path(), StorageConfig::default());
        let found = registry.discover("dbf", "ComId").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.DBF", "b.dbf"]);
        assert_eq!(registry.index_builds(), 0);
        assert_eq!(registry.files_opened(), 0);
    }

    #[test]
    fn test_discover_skips_corrupt_files() {
        let dir = tempdir().unwrap();
        write_keyed(&dir.path().join("good.dbf"), "COMID", &[1]);
        std::fs::write(dir.path().join("bad.dbf"), b"not a dbase file").unwrap();

        let registry = SourceRegistry::new(dir.path(), StorageConfig::default());
        let found = registry.discover("dbf", "COMID").unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("good.dbf"));
    }

    #[test]
    fn test_discover_requires_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.dbf");
        write_keyed(&file, "COMID", &[1]);

        let registry = SourceRegistry::new(&file, StorageConfig::default());
        assert!(matches!(
            registry.discover("dbf", "COMID"),
            Err(JoinError::NotADirectory(_))
        ));

        let registry = SourceRegistry::new(dir.path().join("missing"), StorageConfig::default());
        assert!(matches!(
            registry.discover("dbf", "COMID"),
            Err(JoinError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_open_all_empty_is_config_error() {
        let dir = tempdir().unwrap();
        let registry = SourceRegistry::new(dir.path(), StorageConfig::default());
        let err = registry.open_all(&[], "COMID").unwrap_err();
        assert!(matches!(err, JoinError::NoJoinableSources { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_index_built_once_per_file() {
        let dir = tempdir().unwrap();
        write_keyed(&dir.path().join("a.dbf"), "COMID", &[1, 2]);
        write_keyed(&dir.path().join("b.dbf"), "COMID", &[3]);

        let registry = SourceRegistry::new(dir.path(), StorageConfig::default());
        let candidates = registry.discover("dbf", "COMID").unwrap();

        let first = registry.open_all(&candidates, "COMID").unwrap();
        let second = registry.open_all(&candidates, "comid").unwrap();

        assert_eq!(registry.index_builds(), 2);
        assert_eq!(registry.files_opened(), 4);
        assert_eq!(registry.cached_indexes(), 2);
        for (a, b) in first.iter().zip(&second) {
            assert!(Arc::ptr_eq(a.index(), b.index()));
        }
    }

    #[test]
    fn test_open_all_skips_files_without_keys() {
        let dir = tempdir().unwrap();
        write_keyed(&dir.path().join("a.dbf"), "COMID", &[1, 2]);
        DbfWriter::new(vec![FieldSpec::numeric("COMID", 9, 0)])
            .record(vec![Value::Null])
            .record(vec![Value::Null])
            .write(&dir.path().join("blank.dbf"))
            .unwrap();

        let registry = SourceRegistry::new(dir.path(), StorageConfig::default());
        let candidates = registry.discover("dbf", "COMID").unwrap();
        assert_eq!(candidates.len(), 2);

        for _ in 0..2 {
            let opened = registry.open_all(&candidates, "COMID").unwrap();
            assert_eq!(opened.len(), 1);
            assert!(opened[0].path().ends_with("a.dbf"));
        }
        assert_eq!(registry.index_builds(), 2);

        let only_blank = vec![dir.path().join("blank.dbf")];
        assert!(matches!(
            registry.open_all(&only_blank, "COMID"),
            Err(JoinError::NoJoinableSources { .. })
        ));
    }

    #[test]
    fn test_concurrent_opens_share_one_build() {
        let dir = tempdir().unwrap();
        let keys: Vec<i64> = (1..=500).collect();
        write_keyed(&dir.path().join("a.dbf"), "COMID", &keys);

        let registry = Arc::new(SourceRegistry::new(dir.path(), StorageConfig::default()));
        let path = dir.path().join("a.dbf");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let path = path.clone();
                thread::spawn(move || {
                    let source = registry.open_source(&path, "COMID").unwrap();
                    Arc::clone(source.index())
                })
            })
            .collect();
        let indexes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.index_builds(), 1);
        assert!(indexes.iter().all(|i| Arc::ptr_eq(i, &indexes[0])));
    }
}
