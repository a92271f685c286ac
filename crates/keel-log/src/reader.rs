// reader.rs — Lock-free readers over the segment files.
//
// The log is append-only and never rewritten in place, so readers take no
// lock. The one thing a reader can observe mid-flight is the tail of a
// segment being appended to: an unterminated final line is treated as "not
// written yet" and not yielded.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use keel_events::{Event, EventValidator, SchemaError};
use serde::Serialize;

use crate::error::ReadError;
use crate::rotation::{list_segments, Segment};

/// File and 1-based line number of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RecordLocation {
    pub path: PathBuf,
    pub line: usize,
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// One raw line of the log, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub location: RecordLocation,
    pub text: String,
}

impl LogRecord {
    pub fn parse(&self, validator: &EventValidator) -> Result<Event, SchemaError> {
        validator.validate_str(&self.text)
    }
}

/// A record that failed validation, with enough context to repair it.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub location: RecordLocation,
    pub event_id: Option<String>,
    pub error: SchemaError,
}

impl fmt::Display for RejectedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (event {}): {}",
            self.location,
            self.event_id.as_deref().unwrap_or("<unknown>"),
            self.error
        )
    }
}

/// Reads every segment of one stream, oldest first.
#[derive(Debug, Clone)]
pub struct LogReader {
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    Stream { dir: PathBuf, stream: String },
    Files(Vec<PathBuf>),
}

impl LogReader {
    pub fn new(dir: impl AsRef<Path>, stream: impl Into<String>) -> Self {
        Self {
            source: Source::Stream {
                dir: dir.as_ref().to_path_buf(),
                stream: stream.into(),
            },
        }
    }

    /// Read explicit files in the given order (e.g. a single exported log).
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self {
            source: Source::Files(files),
        }
    }

    pub fn segments(&self) -> Result<Vec<Segment>, ReadError> {
        match &self.source {
            Source::Stream { dir, stream } => list_segments(dir, stream),
            Source::Files(files) => Ok(files
                .iter()
                .map(|path| Segment {
                    path: path.clone(),
                    window: String::new(),
                })
                .collect()),
        }
    }

    /// Iterate raw records across all segments.
    pub fn records(&self) -> Result<Records, ReadError> {
        let mut paths: Vec<PathBuf> = self.segments()?.into_iter().map(|s| s.path).collect();
        paths.reverse();
        Ok(Records {
            pending: paths,
            current: None,
        })
    }

    /// Validate every record: valid events in log order, plus every
    /// rejected record.
    pub fn events(
        &self,
        validator: &EventValidator,
    ) -> Result<(Vec<Event>, Vec<RejectedRecord>), ReadError> {
        let mut events = Vec::new();
        let mut rejected = Vec::new();
        for record in self.records()? {
            let record = record?;
            match record.parse(validator) {
                Ok(event) => events.push(event),
                Err(error) => rejected.push(RejectedRecord {
                    event_id: keel_events::schema::peek_event_id(&record.text),
                    location: record.location,
                    error,
                }),
            }
        }
        Ok((events, rejected))
    }
}

struct OpenSegment {
    path: PathBuf,
    reader: BufReader<File>,
    line: usize,
}

/// Iterator over raw records. Blank lines are skipped.
pub struct Records {
    /// Remaining paths, last element is next.
    pending: Vec<PathBuf>,
    current: Option<OpenSegment>,
}

impl Iterator for Records {
    type Item = Result<LogRecord, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let path = self.pending.pop()?;
                match File::open(&path) {
                    Ok(file) => {
                        self.current = Some(OpenSegment {
                            path,
                            reader: BufReader::new(file),
                            line: 0,
                        })
                    }
                    // Pruned between listing and opening.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(source) => return Some(Err(ReadError::Io { path, source })),
                }
            }
            let segment = self.current.as_mut()?;

            let mut buf = Vec::new();
            match segment.reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.current = None;
                    continue;
                }
                Ok(_) => {
                    segment.line += 1;
                    if buf.last() != Some(&b'\n') {
                        // Unterminated tail: an append still in progress.
                        self.current = None;
                        continue;
                    }
                    let text = String::from_utf8_lossy(&buf).trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    return Some(Ok(LogRecord {
                        location: RecordLocation {
                            path: segment.path.clone(),
                            line: segment.line,
                        },
                        text,
                    }));
                }
                Err(source) => {
                    let path = segment.path.clone();
                    self.current = None;
                    return Some(Err(ReadError::Io { path, source }));
                }
            }
        }
    }
}
