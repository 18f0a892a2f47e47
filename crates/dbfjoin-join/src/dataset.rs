//! Joined dataset: discovery, schema and per-query reader construction.

use crate::reader::JoinedAttributeReader;
use crate::registry::SourceRegistry;
use crate::schema::{JoinAttributeDescriptor, JoinedSchema, Provenance, SourceId};
use crate::stream::{AttributeStream, RecordFileStream, VecStream};
use dbfjoin_common::{
    AttributeDescriptor, JoinConfig, JoinError, KeyProjection, Result, StorageConfig, Value,
};
use dbfjoin_storage::{RecordFile, RecordFileHeader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Supplies the primary attribute stream of a dataset.
pub trait PrimarySource {
    /// Returns every attribute the source can produce, in native order.
    fn attributes(&self) -> &[AttributeDescriptor];

    /// Opens a stream exposing the native attributes at `read_set`, in that
    /// order.
    fn open(&self, read_set: &[usize]) -> Result<Box<dyn AttributeStream>>;
}

/// Primary source backed by a record file, such as a shapefile's sidecar.
#[derive(Debug, Clone)]
pub struct DbfPrimarySource {
    path: PathBuf,
    config: StorageConfig,
    attributes: Vec<AttributeDescriptor>,
}

impl DbfPrimarySource {
    /// Reads the header of `path` to learn its attributes.
    pub fn new(path: impl Into<PathBuf>, config: StorageConfig) -> Result<Self> {
        let path = path.into();
        let header = RecordFileHeader::from_path(&path)?;
        let attributes = header
            .fields()
            .iter()
            .map(|f| AttributeDescriptor::new(&f.name, f.value_type()))
            .collect();
        Ok(Self {
            path,
            config,
            attributes,
        })
    }

    /// Returns the record file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrimarySource for DbfPrimarySource {
    fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    fn open(&self, read_set: &[usize]) -> Result<Box<dyn AttributeStream>> {
        let file = RecordFile::open_with(&self.path, &self.config)?;
        Ok(Box::new(RecordFileStream::with_columns(file, read_set)?))
    }
}

/// Primary source over rows held in memory.
#[derive(Debug, Clone)]
pub struct VecSource {
    attributes: Vec<AttributeDescriptor>,
    rows: Arc<Vec<Vec<Value>>>,
}

impl VecSource {
    /// Creates a source over `rows`, each laid out as `attributes`.
    pub fn new(attributes: Vec<AttributeDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            attributes,
            rows: Arc::new(rows),
        }
    }
}

impl PrimarySource for VecSource {
    fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    fn open(&self, read_set: &[usize]) -> Result<Box<dyn AttributeStream>> {
        Ok(Box::new(VecStream::projected(
            &self.attributes,
            Arc::clone(&self.rows),
            read_set,
        )?))
    }
}

/// Attributes requested by one query.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Requested names; None requests every attribute.
    pub attributes: Option<Vec<String>>,
    /// Restrict the query to primary attributes, ignoring joined ones.
    pub primary_only: bool,
}

impl QueryRequest {
    /// Requests every attribute of the merged schema.
    pub fn all() -> Self {
        Self::default()
    }

    /// Requests the named attributes, in order.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: Some(names.into_iter().map(Into::into).collect()),
            primary_only: false,
        }
    }

    /// Marks the query as satisfiable from the primary stream alone.
    pub fn primary_only(mut self) -> Self {
        self.primary_only = true;
        self
    }
}

/// How a query is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Read the primary stream directly; no secondary file is touched.
    PrimaryOnly {
        /// Native primary attribute positions to read.
        read_set: Vec<usize>,
        output: Vec<JoinAttributeDescriptor>,
    },
    /// Drive the join from the primary stream.
    Joined {
        /// Native primary attribute positions to read, join key included.
        read_set: Vec<usize>,
        /// Position of the join key within `read_set`.
        key_position: usize,
        /// Secondary sources referenced by the output, ascending.
        sources: Vec<SourceId>,
        /// Output attributes. Primary provenance indexes into `read_set`.
        output: Vec<JoinAttributeDescriptor>,
    },
}

impl QueryPlan {
    /// True when the plan reads secondary files.
    pub fn is_joined(&self) -> bool {
        matches!(self, QueryPlan::Joined { .. })
    }

    /// Returns the attributes the reader will expose, in order.
    pub fn output(&self) -> &[JoinAttributeDescriptor] {
        match self {
            QueryPlan::PrimaryOnly { output, .. } | QueryPlan::Joined { output, .. } => output,
        }
    }

    /// Output attribute names.
    pub fn output_names(&self) -> Vec<&str> {
        self.output().iter().map(|a| a.name.as_str()).collect()
    }
}

/// A primary source augmented with attributes from every joinable file in a
/// directory.
pub struct JoinedDataset<P: PrimarySource> {
    config: JoinConfig,
    primary: P,
    registry: Arc<SourceRegistry>,
    /// Secondary file paths; `SourceId(i)` is `sources[i]`.
    sources: Vec<PathBuf>,
    schema: JoinedSchema,
    /// Native position of the join key in the primary source.
    key_attribute: usize,
}

impl<P: PrimarySource> JoinedDataset<P> {
    /// Opens a dataset with a registry of its own.
    ///
    /// Configuration problems, including a directory with no joinable files,
    /// fail here before any row is read.
    pub fn open(config: JoinConfig, primary: P) -> Result<Self> {
        let registry = Arc::new(SourceRegistry::new(
            &config.directory,
            config.storage.clone(),
        ));
        Self::open_with_registry(config, primary, registry)
    }

    /// Opens a dataset reusing `registry`, so indexes built by earlier
    /// datasets over the same directory are not rebuilt.
    pub fn open_with_registry(
        config: JoinConfig,
        primary: P,
        registry: Arc<SourceRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.directory() != config.directory {
            return Err(JoinError::ConfigError(format!(
                "registry scans {} but the dataset is configured for {}",
                registry.directory().display(),
                config.directory.display()
            )));
        }

        let key_attribute = primary
            .attributes()
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(&config.join_field))
            .ok_or_else(|| {
                JoinError::FieldNotFound(format!("{} in primary attributes", config.join_field))
            })?;

        let candidates = registry.discover(&config.extension, &config.join_field)?;
        let mut handles = registry.open_all(&candidates, &config.join_field)?;
        let sources: Vec<PathBuf> = handles.iter().map(|h| h.path().to_path_buf()).collect();

        let headers: Vec<(SourceId, &RecordFileHeader)> = handles
            .iter()
            .enumerate()
            .map(|(i, h)| (SourceId(i), h.file().header().as_ref()))
            .collect();
        let schema = JoinedSchema::merge(primary.attributes(), &headers);

        for handle in &mut handles {
            handle.close()?;
        }

        debug!(
            directory = %config.directory.display(),
            sources = sources.len(),
            attributes = schema.len(),
            "opened joined dataset"
        );

        Ok(Self {
            config,
            primary,
            registry,
            sources,
            schema,
            key_attribute,
        })
    }

    /// Returns the dataset's type name: the directory name with commas
    /// replaced by underscores.
    pub fn type_name(&self) -> String {
        self.config
            .directory
            .file_name()
            .map(|n| n.to_string_lossy().replace(',', "_"))
            .unwrap_or_default()
    }

    /// Returns the merged schema.
    pub fn schema(&self) -> &JoinedSchema {
        &self.schema
    }

    /// Returns the configuration the dataset was opened with.
    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Returns the registry holding this dataset's indexes.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Returns the secondary file paths in source order. Files skipped while
    /// opening are not listed.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Returns the primary source.
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// Decides which streams and columns a query needs.
    pub fn plan(&self, request: &QueryRequest) -> Result<QueryPlan> {
        let mut requested: Vec<usize> = match &request.attributes {
            None => (0..self.schema.len()).collect(),
            Some(names) => {
                let mut positions = Vec::with_capacity(names.len());
                for name in names {
                    let position = self
                        .schema
                        .position(name)
                        .ok_or_else(|| JoinError::AttributeNotFound(name.clone()))?;
                    if !positions.contains(&position) {
                        positions.push(position);
                    }
                }
                positions
            }
        };

        if request.primary_only {
            requested.retain(|&i| self.schema.attributes()[i].is_primary());
        }

        let needs_join = requested
            .iter()
            .any(|&i| !self.schema.attributes()[i].is_primary());

        let mut read_set = Vec::new();
        let mut output = Vec::with_capacity(requested.len() + 1);
        let mut sources = Vec::new();
        for &i in &requested {
            let attribute = &self.schema.attributes()[i];
            let provenance = match attribute.provenance {
                Provenance::Primary { index } => {
                    read_set.push(index);
                    Provenance::Primary {
                        index: read_set.len() - 1,
                    }
                }
                Provenance::Secondary { source, field } => {
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                    Provenance::Secondary { source, field }
                }
            };
            output.push(JoinAttributeDescriptor {
                provenance,
                ..attribute.clone()
            });
        }

        if !needs_join {
            return Ok(QueryPlan::PrimaryOnly { read_set, output });
        }

        let key_position = match read_set.iter().position(|&i| i == self.key_attribute) {
            Some(position) => position,
            None => {
                read_set.push(self.key_attribute);
                let position = read_set.len() - 1;
                if self.config.key_projection == KeyProjection::Expose {
                    let key = &self.primary.attributes()[self.key_attribute];
                    output.push(JoinAttributeDescriptor {
                        name: key.name.clone(),
                        value_type: key.value_type,
                        provenance: Provenance::Primary { index: position },
                    });
                }
                position
            }
        };
        sources.sort();

        Ok(QueryPlan::Joined {
            read_set,
            key_position,
            sources,
            output,
        })
    }

    /// Opens a reader for `request`.
    ///
    /// Primary-only queries get the primary stream itself. Joined queries open
    /// only the secondary files their attributes come from.
    pub fn reader(&self, request: &QueryRequest) -> Result<Box<dyn AttributeStream>> {
        match self.plan(request)? {
            QueryPlan::PrimaryOnly { read_set, .. } => {
                debug!(attributes = read_set.len(), "reading primary attributes only");
                self.primary.open(&read_set)
            }
            QueryPlan::Joined {
                read_set,
                key_position,
                sources,
                output,
            } => {
                let mut opened = Vec::with_capacity(sources.len());
                for id in sources {
                    let source = self
                        .registry
                        .open_source(&self.sources[id.0], &self.config.join_field)?;
                    opened.push((id, source));
                }
                let primary = self.primary.open(&read_set)?;
                debug!(
                    sources = opened.len(),
                    attributes = output.len(),
                    "reading joined attributes"
                );
                let reader = JoinedAttributeReader::new(primary, key_position, opened, &output)?;
                Ok(Box::new(reader))
            }
        }
    }
}

impl<P: PrimarySource> std::fmt::Debug for JoinedDataset<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedDataset")
            .field("directory", &self.config.directory)
            .field("join_field", &self.config.join_field)
            .field("sources", &self.sources)
            .field("attributes", &self.schema.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfjoin_common::ValueType;
    use dbfjoin_storage::fixture::{DbfWriter, FieldSpec};
    use tempfile::tempdir;

    fn primary() -> VecSource {
        VecSource::new(
            vec![
                AttributeDescriptor::new("NAME", ValueType::String),
                AttributeDescriptor::new("COMID", ValueType::Integer),
                AttributeDescriptor::new("LENGTHKM", ValueType::Double),
            ],
            vec![
                vec![Value::from("a"), Value::Integer(10), Value::Double(1.0)],
                vec![Value::from("b"), Value::Integer(20), Value::Double(2.0)],
            ],
        )
    }

    fn dataset(dir: &Path, projection: KeyProjection) -> JoinedDataset<VecSource> {
        DbfWriter::new(vec![
            FieldSpec::numeric("COMID", 9, 0),
            FieldSpec::numeric("Q", 8, 2),
        ])
        .record(vec![Value::Integer(20), Value::Double(3.5)])
        .write(dir.join("flow.dbf"))
        .unwrap();

        let mut config = JoinConfig::new(dir, "comid");
        config.key_projection = projection;
        JoinedDataset::open(config, primary()).unwrap()
    }

    #[test]
    fn test_plan_primary_only() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset
            .plan(&QueryRequest::names(["lengthkm", "NAME"]))
            .unwrap();
        assert_eq!(
            plan,
            QueryPlan::PrimaryOnly {
                read_set: vec![2, 0],
                output: vec![
                    JoinAttributeDescriptor {
                        name: "LENGTHKM".to_string(),
                        value_type: ValueType::Double,
                        provenance: Provenance::Primary { index: 0 },
                    },
                    JoinAttributeDescriptor {
                        name: "NAME".to_string(),
                        value_type: ValueType::String,
                        provenance: Provenance::Primary { index: 1 },
                    },
                ],
            }
        );
    }

    #[test]
    fn test_plan_adds_hidden_key() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset.plan(&QueryRequest::names(["NAME", "Q"])).unwrap();
        match &plan {
            QueryPlan::Joined {
                read_set,
                key_position,
                sources,
                ..
            } => {
                assert_eq!(read_set, &vec![0, 1]);
                assert_eq!(*key_position, 1);
                assert_eq!(sources, &vec![SourceId(0)]);
            }
            other => panic!("expected a joined plan, got {:?}", other),
        }
        assert_eq!(plan.output_names(), vec!["NAME", "Q"]);
    }

    #[test]
    fn test_plan_secondary_only_reads_key_column() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset.plan(&QueryRequest::names(["Q"])).unwrap();
        match &plan {
            QueryPlan::Joined {
                read_set,
                key_position,
                sources,
                output,
            } => {
                assert_eq!(read_set, &vec![1]);
                assert_eq!(*key_position, 0);
                assert_eq!(sources, &vec![SourceId(0)]);
                assert!(output.iter().all(|a| !a.is_primary()));
            }
            other => panic!("expected a joined plan, got {:?}", other),
        }
        assert_eq!(plan.output_names(), vec!["Q"]);

        let mut reader = dataset.reader(&QueryRequest::names(["Q"])).unwrap();
        assert_eq!(reader.attribute_count(), 1);
        let mut values = Vec::new();
        while reader.advance().unwrap() {
            values.push(reader.read(0).unwrap());
        }
        assert_eq!(values, vec![Value::Null, Value::Double(3.5)]);
    }

    #[test]
    fn test_plan_exposes_key_when_configured() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Expose);

        let plan = dataset.plan(&QueryRequest::names(["Q"])).unwrap();
        assert_eq!(plan.output_names(), vec!["Q", "COMID"]);
    }

    #[test]
    fn test_plan_keeps_requested_key_visible() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset.plan(&QueryRequest::names(["COMID", "Q"])).unwrap();
        assert_eq!(plan.output_names(), vec!["COMID", "Q"]);
        match plan {
            QueryPlan::Joined {
                read_set,
                key_position,
                ..
            } => {
                assert_eq!(read_set, vec![1]);
                assert_eq!(key_position, 0);
            }
            other => panic!("expected a joined plan, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_primary_only_flag_drops_joined_names() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset
            .plan(&QueryRequest::names(["NAME", "Q"]).primary_only())
            .unwrap();
        assert!(!plan.is_joined());
        assert_eq!(plan.output_names(), vec!["NAME"]);
    }

    #[test]
    fn test_plan_unknown_attribute() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        assert!(matches!(
            dataset.plan(&QueryRequest::names(["REACHCODE"])),
            Err(JoinError::AttributeNotFound(name)) if name == "REACHCODE"
        ));
    }

    #[test]
    fn test_plan_all_attributes() {
        let dir = tempdir().unwrap();
        let dataset = dataset(dir.path(), KeyProjection::Hide);

        let plan = dataset.plan(&QueryRequest::all()).unwrap();
        assert!(plan.is_joined());
        assert_eq!(plan.output_names(), vec!["NAME", "COMID", "LENGTHKM", "Q"]);
    }

    #[test]
    fn test_type_name_replaces_commas() {
        let root = tempdir().unwrap();
        let dir = root.path().join("flow,2024");
        std::fs::create_dir(&dir).unwrap();
        let dataset = dataset(&dir, KeyProjection::Hide);
        assert_eq!(dataset.type_name(), "flow_2024");
    }

    #[test]
    fn test_primary_must_have_join_field() {
        let dir = tempdir().unwrap();
        DbfWriter::new(vec![FieldSpec::numeric("COMID", 9, 0)])
            .record(vec![Value::Integer(1)])
            .write(dir.path().join("flow.dbf"))
            .unwrap();

        let config = JoinConfig::new(dir.path(), "HUC8");
        let result = JoinedDataset::open(config, primary());
        assert!(matches!(result, Err(JoinError::FieldNotFound(_))));
    }

    #[test]
    fn test_registry_directory_must_match() {
        let dir = tempdir().unwrap();
        let other = tempdir().unwrap();
        let registry = Arc::new(SourceRegistry::new(other.path(), StorageConfig::default()));

        let config = JoinConfig::new(dir.path(), "COMID");
        let result = JoinedDataset::open_with_registry(config, primary(), registry);
        assert!(matches!(result, Err(JoinError::ConfigError(_))));
    }
}
