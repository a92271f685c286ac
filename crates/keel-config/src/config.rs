// config.rs — Keel configuration.
//
// KeelConfig describes where the event log lives, how it rotates and is
// pruned, which schema majors readers accept, and which handlers the
// router starts with. The `for_project()` constructor produces the
// standard `.keel/` layout; `load()` reads `.keel/keel.toml` and resolves
// relative paths against the directory holding the file.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use keel_events::{EventFilter, EventValidator};
use keel_log::{EventWriter, RetentionPolicy, RotationPeriod, WriterOptions};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory under the project root holding Keel's state.
pub const KEEL_DIR: &str = ".keel";
pub const CONFIG_FILE: &str = "keel.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default)]
    pub rotation: RotationPeriod,
    #[serde(default = "default_true")]
    pub fsync: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            stream: default_stream(),
            rotation: RotationPeriod::default(),
            fsync: true,
        }
    }
}

impl LogConfig {
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions::new(&self.dir)
            .with_stream(self.stream.clone())
            .with_rotation(self.rotation)
            .with_fsync(self.fsync)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Major schema versions readers accept. The writer's own major is
    /// always accepted.
    #[serde(default = "default_majors")]
    pub supported_majors: Vec<u64>,
    /// Reject unknown top-level fields instead of preserving them.
    #[serde(default)]
    pub strict: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            supported_majors: default_majors(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Pending invocations older than this are reported as orphans.
    #[serde(default = "default_orphan_grace_secs")]
    pub orphan_grace_secs: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            orphan_grace_secs: default_orphan_grace_secs(),
        }
    }
}

impl ActionsConfig {
    pub fn orphan_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.orphan_grace_secs).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Append matching events to a JSONL file.
    Jsonl,
    /// Count matching events.
    Metrics,
    /// Keep matching events in memory for queries.
    Index,
}

/// One `[[handlers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    pub kind: HandlerKind,
    /// Output file, required for `jsonl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Most events an `index` handler keeps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    /// Run the handler on its own worker thread.
    #[serde(default)]
    pub queued: bool,
    /// Timestamps are RFC 3339 strings.
    #[serde(default, skip_serializing_if = "EventFilter::is_empty")]
    pub filter: EventFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeelConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<HandlerConfig>,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("events")
}

fn default_stream() -> String {
    "workflow".to_string()
}

fn default_true() -> bool {
    true
}

fn default_majors() -> Vec<u64> {
    vec![keel_events::CURRENT_SCHEMA_VERSION.major]
}

fn default_orphan_grace_secs() -> u64 {
    15 * 60
}

fn default_pattern() -> String {
    "*".to_string()
}

impl KeelConfig {
    /// Standard `.keel/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let keel_dir = project_root.as_ref().join(KEEL_DIR);
        let mut config = Self::default();
        config.log.dir = keel_dir.join("events");
        config
    }

    /// Path of the config file for a project.
    pub fn path_for_project(project_root: impl AsRef<Path>) -> PathBuf {
        project_root.as_ref().join(KEEL_DIR).join(CONFIG_FILE)
    }

    /// Parse TOML, resolving relative paths against `base`.
    pub fn from_toml(text: &str, base: &Path, origin: &Path) -> Result<Self, ConfigError> {
        let mut config: KeelConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.resolve_paths(base);
        config.check()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml(&text, path.parent().unwrap_or(Path::new(".")), path)
    }

    /// Load the project's config, or the standard layout if there is none.
    pub fn load_or_default(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = project_root.as_ref();
        match Self::load(Self::path_for_project(root)) {
            Err(ConfigError::Missing { .. }) => Ok(Self::for_project(root)),
            other => other,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write this config, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        fs::write(path, self.to_toml()?).map_err(|e| ConfigError::io(path, e))
    }

    pub fn validator(&self) -> EventValidator {
        EventValidator::new(self.schema.supported_majors.iter().copied()).strict(self.schema.strict)
    }

    pub fn writer(&self) -> EventWriter {
        EventWriter::new(self.log.writer_options(), self.validator())
    }

    pub fn reader(&self) -> keel_log::LogReader {
        keel_log::LogReader::new(&self.log.dir, self.log.stream.clone())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.log.dir);
        if let Some(dir) = self.retention.archive_dir.as_mut() {
            resolve(dir);
        }
        for handler in &mut self.handlers {
            if let Some(path) = handler.path.as_mut() {
                resolve(path);
            }
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !keel_events::schema::is_identifier(&self.log.stream) {
            return Err(ConfigError::Invalid {
                field: "log.stream".to_string(),
                reason: format!("'{}' is not a lowercase identifier", self.log.stream),
            });
        }
        let mut names = BTreeSet::new();
        for handler in &self.handlers {
            if !names.insert(handler.name.as_str()) {
                return Err(ConfigError::Invalid {
                    field: "handlers.name".to_string(),
                    reason: format!("duplicate handler '{}'", handler.name),
                });
            }
            if handler.kind == HandlerKind::Jsonl && handler.path.is_none() {
                return Err(ConfigError::Invalid {
                    field: format!("handlers.{}.path", handler.name),
                    reason: "jsonl handlers need a path".to_string(),
                });
            }
            keel_events::EventPattern::new(&handler.pattern)?;
        }
        Ok(())
    }
}
