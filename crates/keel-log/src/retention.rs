// retention.rs — Retention of rotated segments.
//
// Old segments can be archived (moved into an archive directory) or
// deleted, by age and/or by keeping only the newest N. The newest segment
// is always kept: it is the one being appended to.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RetentionError;
use crate::rotation::{list_segments, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    #[default]
    Archive,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Segments whose window started more than this many days ago expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
    /// Keep at most this many of the newest segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_segments: Option<usize>,
    #[serde(default)]
    pub mode: RetentionMode,
    /// Where archived segments go; defaults to `<log dir>/archive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
}

impl RetentionPolicy {
    /// A policy with no limits never touches anything.
    pub fn is_disabled(&self) -> bool {
        self.max_age_days.is_none() && self.keep_segments.is_none()
    }

    /// Which segments expire at `now`. Pure; `segments` must be oldest first.
    pub fn select<'a>(&self, segments: &'a [Segment], now: DateTime<Utc>) -> Vec<&'a Segment> {
        if self.is_disabled() || segments.len() <= 1 {
            return Vec::new();
        }
        let candidates = &segments[..segments.len() - 1];
        let keep_from = self
            .keep_segments
            .map(|keep| segments.len().saturating_sub(keep.max(1)))
            .unwrap_or(0);
        let cutoff = self
            .max_age_days
            .map(|days| now - Duration::days(i64::from(days)));

        candidates
            .iter()
            .enumerate()
            .filter(|(i, segment)| {
                let too_many = *i < keep_from;
                let too_old = match (cutoff, segment.window_start()) {
                    (Some(cutoff), Some(start)) => start < cutoff,
                    _ => false,
                };
                too_many || too_old
            })
            .map(|(_, segment)| segment)
            .collect()
    }

    /// Archive or delete expired segments of `stream` in `dir`.
    pub fn apply(
        &self,
        dir: &Path,
        stream: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>, RetentionError> {
        let segments = list_segments(dir, stream)?;
        let expired = self.select(&segments, now);
        if expired.is_empty() {
            return Ok(Vec::new());
        }

        let archive_dir = self
            .archive_dir
            .clone()
            .unwrap_or_else(|| dir.join("archive"));
        if self.mode == RetentionMode::Archive {
            fs::create_dir_all(&archive_dir).map_err(|source| RetentionError::Io {
                action: "create",
                path: archive_dir.clone(),
                source,
            })?;
        }

        let mut affected = Vec::with_capacity(expired.len());
        for segment in expired {
            match self.mode {
                RetentionMode::Delete => {
                    fs::remove_file(&segment.path).map_err(|source| RetentionError::Io {
                        action: "delete",
                        path: segment.path.clone(),
                        source,
                    })?;
                }
                RetentionMode::Archive => {
                    let Some(name) = segment.path.file_name() else { continue };
                    fs::rename(&segment.path, archive_dir.join(name)).map_err(|source| {
                        RetentionError::Io {
                            action: "archive",
                            path: segment.path.clone(),
                            source,
                        }
                    })?;
                }
            }
            tracing::info!(path = %segment.path.display(), mode = ?self.mode, "segment retired");
            affected.push(segment.path.clone());
        }
        Ok(affected)
    }
}
