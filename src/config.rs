//! Configuration types for source definitions
//!
//! A source is a list of stream definitions plus the read configuration,
//! loaded from YAML (or JSON, which YAML accepts).

use crate::cursor::{
    Cursor, CursorFactory, DatetimeCursor, DatetimeCursorConfig, ResumableFullRefreshCursor,
};
use crate::engine::ReadConfig;
use crate::error::{Error, Result};
use crate::incremental::{
    GlobalSubstreamCursor, PerPartitionCursor, SingleStreamCursor, StreamCursor,
    DEFAULT_MAX_PARTITIONS,
};
use crate::partition::{
    ListRouter, ParentRouter, PartitionConfig, PartitionRouter, SinglePartitionRouter,
};
use crate::stream::{DefaultStream, Retriever, Stream};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Top-Level Source Config
// ============================================================================

/// Complete source configuration loaded from YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Read configuration shared by every stream
    #[serde(default)]
    pub read: ReadConfig,

    /// Stream definitions, parents before their children
    #[serde(default)]
    pub streams: Vec<StreamDefinition>,
}

impl SourceConfig {
    /// Find a stream definition by name
    pub fn stream(&self, name: &str) -> Option<&StreamDefinition> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Check names, parent references, and cursor settings
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.name.is_empty() {
                return Err(Error::config("Stream name cannot be empty"));
            }
            if let Some(parent) = stream.partition.parent_stream() {
                if !seen.contains(parent) {
                    return Err(Error::config(format!(
                        "Stream '{}' references parent '{parent}', which must be defined before it",
                        stream.name
                    )));
                }
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(Error::config(format!(
                    "Duplicate stream name: {}",
                    stream.name
                )));
            }
            stream.validate()?;
        }
        Ok(())
    }

    /// Build every stream, resolving parents by name.
    ///
    /// Children read their parent through a separate instance with its own
    /// cursor, so syncing the parent stream itself never touches the
    /// parent state tracked by its children.
    pub fn build_streams<F>(&self, mut retriever_for: F) -> Result<Vec<Arc<dyn Stream>>>
    where
        F: FnMut(&StreamDefinition) -> Arc<dyn Retriever>,
    {
        let mut parents: HashMap<String, Arc<dyn Stream>> = HashMap::new();
        let mut streams: Vec<Arc<dyn Stream>> = Vec::with_capacity(self.streams.len());
        for definition in &self.streams {
            streams.push(Arc::new(
                definition.build_stream(retriever_for(definition), &parents)?,
            ));
            let parent = definition.build_stream(retriever_for(definition), &parents)?;
            parents.insert(definition.name.clone(), Arc::new(parent));
        }
        Ok(streams)
    }
}

/// Load a source configuration from a YAML file
pub fn load_config(path: impl AsRef<Path>) -> Result<SourceConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    load_config_from_str(&content)
}

/// Load a source configuration from a YAML string
pub fn load_config_from_str(yaml: &str) -> Result<SourceConfig> {
    let config: SourceConfig = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse source YAML: {e}")))?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Stream Definition
// ============================================================================

/// One stream of the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDefinition {
    /// Stream name
    pub name: String,

    /// Cursor of each partition
    #[serde(default)]
    pub cursor: CursorDefinition,

    /// How the stream is partitioned
    #[serde(default)]
    pub partition: PartitionConfig,

    /// How partitioned progress is stored
    #[serde(default)]
    pub state_strategy: StateStrategy,

    /// JSON schema of the stream's records
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

impl StreamDefinition {
    /// Create a definition with a resumable full refresh cursor and no partitioning
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cursor: CursorDefinition::default(),
            partition: PartitionConfig::None,
            state_strategy: StateStrategy::default(),
            schema: None,
        }
    }

    /// Set the cursor
    #[must_use]
    pub fn with_cursor(mut self, cursor: CursorDefinition) -> Self {
        self.cursor = cursor;
        self
    }

    /// Set the partitioning
    #[must_use]
    pub fn with_partition(mut self, partition: PartitionConfig) -> Self {
        self.partition = partition;
        self
    }

    /// Set the state strategy
    #[must_use]
    pub fn with_state_strategy(mut self, strategy: StateStrategy) -> Self {
        self.state_strategy = strategy;
        self
    }

    fn validate(&self) -> Result<()> {
        if let StateStrategy::PerPartition { max_partitions: 0, .. } = self.state_strategy {
            return Err(Error::invalid_value(
                format!("{}.state_strategy.max_partitions", self.name),
                "must be greater than 0",
            ));
        }
        self.cursor
            .create_cursor()
            .map(|_| ())
            .map_err(|e| Error::invalid_value(format!("{}.cursor", self.name), e.to_string()))
    }

    /// Build the partition router, resolving a parent among `parents`
    pub fn build_router(
        &self,
        parents: &HashMap<String, Arc<dyn Stream>>,
    ) -> Result<Arc<dyn PartitionRouter>> {
        let router: Arc<dyn PartitionRouter> = match &self.partition {
            PartitionConfig::None => Arc::new(SinglePartitionRouter),
            PartitionConfig::List {
                values,
                partition_field,
            } => Arc::new(ListRouter::new(values.clone(), partition_field.clone())),
            PartitionConfig::Parent {
                parent_stream,
                parent_key,
                partition_field,
                incremental_dependency,
            } => {
                let parent = parents.get(parent_stream).ok_or_else(|| Error::StreamNotFound {
                    stream: parent_stream.clone(),
                })?;
                Arc::new(
                    ParentRouter::new(Arc::clone(parent), parent_key.clone(), partition_field.clone())
                        .with_incremental_dependency(*incremental_dependency),
                )
            }
        };
        Ok(router)
    }

    /// Build the stream-level cursor for this definition
    pub fn build_cursor(&self, router: Arc<dyn PartitionRouter>) -> Result<Arc<dyn StreamCursor>> {
        if self.partition == PartitionConfig::None {
            return Ok(Arc::new(SingleStreamCursor::new(
                &self.name,
                self.cursor.create_cursor()?,
            )));
        }

        let cursor: Arc<dyn StreamCursor> = match self.state_strategy {
            StateStrategy::PerPartition {
                max_partitions,
                global_cursor_limit,
            } => {
                let cursor = PerPartitionCursor::new(&self.name, router, Arc::new(self.cursor.clone()))
                    .with_max_partitions(max_partitions);
                match global_cursor_limit {
                    Some(limit) => Arc::new(cursor.with_global_cursor_limit(limit)),
                    None => Arc::new(cursor),
                }
            }
            StateStrategy::Global => Arc::new(GlobalSubstreamCursor::new(
                &self.name,
                router,
                self.cursor.create_cursor()?,
            )),
        };
        Ok(cursor)
    }

    /// Assemble a readable stream
    pub fn build_stream(
        &self,
        retriever: Arc<dyn Retriever>,
        parents: &HashMap<String, Arc<dyn Stream>>,
    ) -> Result<DefaultStream> {
        let router = self.build_router(parents)?;
        let cursor = self.build_cursor(router)?;
        let mut stream = DefaultStream::new(&self.name, cursor, retriever);
        if let Some(field) = self.cursor.cursor_field() {
            stream = stream.with_cursor_field(field);
        }
        if let Some(schema) = &self.schema {
            stream = stream.with_schema(schema.clone());
        }
        Ok(stream)
    }
}

// ============================================================================
// Cursor Definition
// ============================================================================

/// Concrete cursor type of a stream, chosen at load time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CursorDefinition {
    /// Datetime window cursor
    Datetime(DatetimeCursorConfig),
    /// Positional cursor for full refreshes
    #[default]
    ResumableFullRefresh,
}

impl CursorDefinition {
    /// Record field the cursor tracks, if any
    pub fn cursor_field(&self) -> Option<&str> {
        match self {
            CursorDefinition::Datetime(config) => Some(&config.cursor_field),
            CursorDefinition::ResumableFullRefresh => None,
        }
    }
}

impl CursorFactory for CursorDefinition {
    fn create_cursor(&self) -> Result<Box<dyn Cursor>> {
        Ok(match self {
            CursorDefinition::Datetime(config) => Box::new(DatetimeCursor::new(config)?),
            CursorDefinition::ResumableFullRefresh => Box::new(ResumableFullRefreshCursor::new()),
        })
    }
}

// ============================================================================
// State Strategy
// ============================================================================

/// How progress of a partitioned stream is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStrategy {
    /// One cursor state per partition, bounded table
    PerPartition {
        /// Partition ceiling
        #[serde(default = "default_max_partitions")]
        max_partitions: usize,
        /// Keep only the fallback state once more partitions than this are seen
        #[serde(default)]
        global_cursor_limit: Option<usize>,
    },
    /// One shared cursor state
    Global,
}

fn default_max_partitions() -> usize {
    DEFAULT_MAX_PARTITIONS
}

impl Default for StateStrategy {
    fn default() -> Self {
        StateStrategy::PerPartition {
            max_partitions: DEFAULT_MAX_PARTITIONS,
            global_cursor_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ReadRequest, RecordIter};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SOURCE_YAML: &str = r#"
read:
  concurrency: 8
  checkpoint_interval: 50
streams:
  - name: posts
    cursor:
      type: datetime
      cursor_field: updated_at
      start: "2024-01-01T00:00:00Z"
      end: "2024-01-31T00:00:00Z"
      step: "7d"
      cursor_granularity: "1s"
  - name: comments
    cursor:
      type: datetime
      cursor_field: updated_at
      start: "2024-01-01"
      end: "2024-01-31"
      datetime_format: "%Y-%m-%d"
    partition:
      type: parent
      parent_stream: posts
      parent_key: id
      partition_field: post_id
      incremental_dependency: true
    state_strategy:
      type: per_partition
      max_partitions: 100
      global_cursor_limit: 50
  - name: votes
    partition:
      type: list
      values: ["up", "down"]
      partition_field: kind
    state_strategy:
      type: global
"#;

    fn empty_retriever(_: &StreamDefinition) -> Arc<dyn Retriever> {
        Arc::new(|_: &ReadRequest| -> Result<RecordIter> { Ok(Box::new(std::iter::empty())) })
    }

    #[test]
    fn test_parse_source_config() {
        let config = load_config_from_str(SOURCE_YAML).unwrap();

        assert_eq!(config.read.concurrency, 8);
        assert_eq!(config.read.checkpoint_interval, 50);
        assert_eq!(config.read.queue_capacity, 16);
        assert_eq!(config.streams.len(), 3);

        let comments = config.stream("comments").unwrap();
        assert_eq!(comments.cursor.cursor_field(), Some("updated_at"));
        assert_eq!(comments.partition.parent_stream(), Some("posts"));
        assert_eq!(
            comments.state_strategy,
            StateStrategy::PerPartition {
                max_partitions: 100,
                global_cursor_limit: Some(50)
            }
        );

        let votes = config.stream("votes").unwrap();
        assert_eq!(votes.cursor, CursorDefinition::ResumableFullRefresh);
        assert_eq!(votes.state_strategy, StateStrategy::Global);
    }

    #[test]
    fn test_defaults() {
        let config = load_config_from_str("streams:\n  - name: users\n").unwrap();
        let users = &config.streams[0];

        assert_eq!(config.read, ReadConfig::default());
        assert_eq!(users.partition, PartitionConfig::None);
        assert_eq!(
            users.state_strategy,
            StateStrategy::PerPartition {
                max_partitions: DEFAULT_MAX_PARTITIONS,
                global_cursor_limit: None
            }
        );
    }

    #[test]
    fn test_parse_json_source() {
        let config = load_config_from_str(
            r#"{"streams": [{"name": "users", "cursor": {"type": "resumable_full_refresh"}}]}"#,
        )
        .unwrap();
        assert_eq!(config.streams[0].name, "users");
    }

    #[test]
    fn test_reject_unknown_parent() {
        let yaml = r#"
streams:
  - name: comments
    partition:
      type: parent
      parent_stream: posts
      parent_key: id
      partition_field: post_id
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("posts"));
    }

    #[test]
    fn test_reject_duplicate_names() {
        let err = load_config_from_str("streams:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_reject_zero_max_partitions() {
        let yaml = r#"
streams:
  - name: a
    partition:
      type: list
      values: ["x"]
      partition_field: k
    state_strategy:
      type: per_partition
      max_partitions: 0
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_reject_invalid_datetime_cursor() {
        let yaml = r#"
streams:
  - name: a
    cursor:
      type: datetime
      cursor_field: updated_at
      start: "not a date"
"#;
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_reject_malformed_yaml() {
        let err = load_config_from_str("streams: [").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_cursor_definition_factory() {
        let definition = CursorDefinition::ResumableFullRefresh;
        let cursor = definition.create_cursor().unwrap();
        assert!(cursor.get_stream_state().is_empty());
    }

    #[test]
    fn test_build_streams_picks_state_shapes() {
        let config = load_config_from_str(SOURCE_YAML).unwrap();
        let streams = config.build_streams(empty_retriever).unwrap();
        let names: Vec<&str> = streams.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["posts", "comments", "votes"]);

        assert_eq!(streams[0].cursor_field(), Some("updated_at"));
        // Unpartitioned: bare cursor state
        assert_eq!(streams[0].cursor().get_stream_state(), json!({}));
        // Per-partition: empty table until a partition is read
        assert_eq!(streams[1].cursor().get_stream_state(), json!({"states": []}));
        // Global: shared state only
        assert_eq!(streams[2].cursor().get_stream_state(), json!({"state": {}}));
    }
}
