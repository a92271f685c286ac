// manager.rs — Config reloads that leave a trail in the event log.
//
// The manager remembers the SHA-256 of the file content it last loaded.
// A reload that finds a different hash parses the new file, swaps it in,
// and emits `system.config_change` naming the top-level sections that
// differ. An unchanged file emits nothing; a file that no longer parses
// leaves the current config in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use keel_events::{namespaces, Event, EventDraft};
use keel_log::Emitter;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::KeelConfig;
use crate::error::ConfigError;

pub const CONFIG_CHANGE: &str = "config_change";

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

struct Loaded {
    config: KeelConfig,
    hash: Option<String>,
    raw: toml::Table,
}

pub struct ConfigManager {
    path: PathBuf,
    loaded: Mutex<Loaded>,
}

impl ConfigManager {
    /// Load `path` now. The initial load emits nothing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::io(&path, e))?;
        let loaded = parse(&path, &text)?;
        Ok(Self {
            path,
            loaded: Mutex::new(loaded),
        })
    }

    /// Start from `config` with no file loaded yet; the first reload that
    /// finds the file reports every section it sets.
    pub fn with_defaults(path: impl AsRef<Path>, config: KeelConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            loaded: Mutex::new(Loaded {
                config,
                hash: None,
                raw: toml::Table::new(),
            }),
        }
    }

    /// Pick up where an earlier process left off. `previous` is the
    /// content it last applied and `recorded_hash` the hash the log last
    /// recorded. A snapshot that does not match the recorded hash is
    /// ignored, so the next reload reports every section.
    pub fn resume(
        path: impl AsRef<Path>,
        fallback: KeelConfig,
        previous: Option<&str>,
        recorded_hash: Option<String>,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let snapshot = previous
            .and_then(|text| parse(&path, text).ok())
            .filter(|loaded| recorded_hash.is_none() || loaded.hash == recorded_hash);
        let loaded = snapshot.unwrap_or(Loaded {
            config: fallback,
            hash: recorded_hash,
            raw: toml::Table::new(),
        });
        Self {
            path,
            loaded: Mutex::new(loaded),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> KeelConfig {
        self.lock().config.clone()
    }

    /// Hash of the content last loaded, if any.
    pub fn hash(&self) -> Option<String> {
        self.lock().hash.clone()
    }

    /// Re-read the file. Returns the change event when the content changed.
    pub fn reload(&self, emitter: &dyn Emitter, actor: &str) -> Result<Option<Event>, ConfigError> {
        let text = fs::read_to_string(&self.path).map_err(|e| ConfigError::io(&self.path, e))?;
        let current_hash = content_hash(text.as_bytes());

        let mut loaded = self.lock();
        if loaded.hash.as_deref() == Some(current_hash.as_str()) {
            tracing::debug!(path = %self.path.display(), "config unchanged");
            return Ok(None);
        }
        let next = parse(&self.path, &text)?;
        let changed = changed_sections(&loaded.raw, &next.raw);

        let event = emitter.emit(
            EventDraft::new(namespaces::SYSTEM, CONFIG_CHANGE, actor).with_payload(json!({
                "changed": changed,
                "previous_hash": loaded.hash,
                "current_hash": current_hash,
                "path": self.path.display().to_string(),
            })),
        )?;
        tracing::info!(
            path = %self.path.display(),
            changed = ?changed,
            event_id = %event.event_id,
            "config reloaded"
        );
        *loaded = next;
        Ok(Some(event))
    }

    fn lock(&self) -> MutexGuard<'_, Loaded> {
        self.loaded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse(path: &Path, text: &str) -> Result<Loaded, ConfigError> {
    let raw: toml::Table = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let config = KeelConfig::from_toml(text, path.parent().unwrap_or(Path::new(".")), path)?;
    Ok(Loaded {
        config,
        hash: Some(content_hash(text.as_bytes())),
        raw,
    })
}

/// Top-level keys whose values differ, sorted.
fn changed_sections(before: &toml::Table, after: &toml::Table) -> Vec<String> {
    let mut keys: Vec<String> = before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_log::{EventWriter, LogReader, WriterOptions};
    use tempfile::tempdir;

    fn setup(initial: &str) -> (tempfile::TempDir, PathBuf, EventWriter) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        fs::write(&path, initial).unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path().join("events")).with_fsync(false));
        (dir, path, writer)
    }

    #[test]
    fn unchanged_reload_emits_nothing() {
        let (_dir, path, writer) = setup("[actions]\norphan_grace_secs = 60\n");
        let manager = ConfigManager::open(&path).unwrap();
        assert!(manager.reload(&writer, "keel").unwrap().is_none());
        assert!(manager.reload(&writer, "keel").unwrap().is_none());
    }

    #[test]
    fn changed_reload_reports_sections_and_hashes() {
        let (dir, path, writer) = setup("[actions]\norphan_grace_secs = 60\n\n[log]\nfsync = false\n");
        let manager = ConfigManager::open(&path).unwrap();
        let before = manager.hash().unwrap();

        fs::write(
            &path,
            "[actions]\norphan_grace_secs = 120\n\n[log]\nfsync = false\n\n[retention]\nkeep_segments = 3\n",
        )
        .unwrap();
        let event = manager.reload(&writer, "operator").unwrap().unwrap();

        assert_eq!(event.routing_key(), "system.config_change");
        assert_eq!(event.payload["changed"], json!(["actions", "retention"]));
        assert_eq!(event.payload["previous_hash"], json!(before));
        assert_eq!(event.payload["current_hash"], json!(manager.hash().unwrap()));
        assert_eq!(manager.current().actions.orphan_grace_secs, 120);

        let logged = LogReader::new(dir.path().join("events"), "workflow")
            .events(&keel_events::EventValidator::default())
            .unwrap()
            .0;
        assert_eq!(logged, vec![event]);
    }

    #[test]
    fn unparsable_file_keeps_current_config() {
        let (_dir, path, writer) = setup("[actions]\norphan_grace_secs = 60\n");
        let manager = ConfigManager::open(&path).unwrap();
        fs::write(&path, "[actions\n").unwrap();
        assert!(matches!(
            manager.reload(&writer, "keel"),
            Err(ConfigError::Parse { .. })
        ));
        assert_eq!(manager.current().actions.orphan_grace_secs, 60);
    }

    #[test]
    fn resume_diffs_against_the_applied_snapshot() {
        let old = "[actions]\norphan_grace_secs = 60\n";
        let (dir, path, writer) = setup("[actions]\norphan_grace_secs = 60\n\n[schema]\nstrict = true\n");
        let recorded = Some(content_hash(old.as_bytes()));

        let manager =
            ConfigManager::resume(&path, KeelConfig::for_project(dir.path()), Some(old), recorded.clone());
        let event = manager.reload(&writer, "keel").unwrap().unwrap();
        assert_eq!(event.payload["changed"], json!(["schema"]));
        assert_eq!(event.payload["previous_hash"], json!(recorded));

        let stale = ConfigManager::resume(
            &path,
            KeelConfig::for_project(dir.path()),
            Some("[log]\nfsync = false\n"),
            recorded,
        );
        let event = stale.reload(&writer, "keel").unwrap().unwrap();
        assert_eq!(event.payload["changed"], json!(["actions", "schema"]));
    }

    #[test]
    fn first_load_from_defaults_has_no_previous_hash() {
        let (dir, path, writer) = setup("[log]\nrotation = \"hourly\"\n");
        let manager = ConfigManager::with_defaults(&path, KeelConfig::for_project(dir.path()));
        let event = manager.reload(&writer, "keel").unwrap().unwrap();
        assert_eq!(event.payload["previous_hash"], serde_json::Value::Null);
        assert_eq!(event.payload["changed"], json!(["log"]));
    }
}
