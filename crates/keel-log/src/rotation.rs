// rotation.rs — Segment windows and file naming.
//
// One file per rotation window, named `events-<stream>-<window>.jsonl`.
// Windows are `YYYYMMDD` (daily), `YYYYMMDDTHH` (hourly) or `all`, so a
// plain lexicographic sort of file names is creation order, even in a
// directory that switched between daily and hourly rotation.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPeriod {
    Hourly,
    #[default]
    Daily,
    /// A single segment forever.
    Never,
}

impl RotationPeriod {
    /// Window label for an event observed at `at`.
    pub fn window(&self, at: DateTime<Utc>) -> String {
        match self {
            RotationPeriod::Hourly => at.format("%Y%m%dT%H").to_string(),
            RotationPeriod::Daily => at.format("%Y%m%d").to_string(),
            RotationPeriod::Never => "all".to_string(),
        }
    }
}

/// Start of the window a label describes. `None` for `all` or labels this
/// crate did not produce.
pub fn window_start(window: &str) -> Option<DateTime<Utc>> {
    let naive = if window.len() == 8 {
        NaiveDate::parse_from_str(window, "%Y%m%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?
    } else if window.len() == 11 {
        NaiveDateTime::parse_from_str(&format!("{}00", window), "%Y%m%dT%H%M").ok()?
    } else {
        return None;
    };
    Some(Utc.from_utc_datetime(&naive))
}

pub fn segment_file_name(stream: &str, window: &str) -> String {
    format!("events-{}-{}.jsonl", stream, window)
}

/// One rotated log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub window: String,
}

impl Segment {
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        window_start(&self.window)
    }
}

/// Window label of `file_name` if it is a segment of `stream`.
pub fn parse_segment_name<'a>(stream: &str, file_name: &'a str) -> Option<&'a str> {
    let window = file_name
        .strip_prefix("events-")?
        .strip_prefix(stream)?
        .strip_prefix('-')?
        .strip_suffix(".jsonl")?;
    if window.is_empty() || window.contains('-') {
        return None;
    }
    Some(window)
}

/// All segments of `stream` in `dir`, oldest first. A missing directory
/// is an empty log.
pub fn list_segments(dir: &Path, stream: &str) -> Result<Vec<Segment>, ReadError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ReadError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ReadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(window) = parse_segment_name(stream, name) {
            segments.push(Segment {
                path: entry.path(),
                window: window.to_string(),
            });
        }
    }
    segments.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(segments)
}
