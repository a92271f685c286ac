// writer.rs — Append-only, time-rotated JSONL event writer.
//
// The writer is the only component that writes the log. Each append runs
// the same short critical section:
//
//   serialize → lock segment (exclusive, OS-level) → write line → fsync → unlock
//
// The line is written with a single `write_all` on a file opened in append
// mode. If that write fails part-way the segment is truncated back to its
// previous length, so readers never see a partial record. Readers also
// ignore an unterminated final line, which covers a write still in flight.
//
// Within one writer instance appends are serialized by a mutex, so file
// order equals event-id order. Written events are queued for observers
// while that mutex is held and delivered after it is released, by whichever
// caller finds no delivery in progress. Observers therefore see events in
// append order and may emit through the same writer from `on_append`.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use fs2::FileExt;
use keel_events::{namespaces, Event, EventDraft, EventIdGenerator, EventValidator};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{RetentionError, WriteError};
use crate::retention::RetentionPolicy;
use crate::rotation::{segment_file_name, RotationPeriod};

/// Where and how the writer persists events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Stream name embedded in segment file names.
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default)]
    pub rotation: RotationPeriod,
    /// `sync_data` after every append.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

fn default_stream() -> String {
    "workflow".to_string()
}

fn default_fsync() -> bool {
    true
}

impl WriterOptions {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stream: default_stream(),
            rotation: RotationPeriod::default(),
            fsync: default_fsync(),
        }
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    pub fn with_rotation(mut self, rotation: RotationPeriod) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }
}

/// Notified with every successfully written event.
///
/// Implementations run on a producer's thread with no writer lock held, so
/// they may emit follow-up events through the same writer. Those are
/// delivered after the current call returns. Slow consumers should hand the
/// event off to their own thread instead of doing the work inline.
pub trait AppendObserver: Send + Sync {
    fn on_append(&self, event: &Event);
}

/// Anything that can turn drafts into written events.
///
/// [`EventWriter`] is the production implementation; the trait is the seam
/// the action wrapper and config manager depend on.
pub trait Emitter: Send + Sync {
    fn emit(&self, draft: EventDraft) -> Result<Event, WriteError>;
}

struct WriterState {
    ids: EventIdGenerator,
}

/// Written events not yet handed to observers.
#[derive(Default)]
struct Delivery {
    pending: VecDeque<Event>,
    active: bool,
}

/// An append-only event log writer.
pub struct EventWriter {
    options: WriterOptions,
    validator: EventValidator,
    state: Mutex<WriterState>,
    observers: RwLock<Vec<Arc<dyn AppendObserver>>>,
    delivery: Mutex<Delivery>,
}

impl EventWriter {
    pub fn new(options: WriterOptions, validator: EventValidator) -> Self {
        Self {
            options,
            validator,
            state: Mutex::new(WriterState {
                ids: EventIdGenerator::new(),
            }),
            observers: RwLock::new(Vec::new()),
            delivery: Mutex::new(Delivery::default()),
        }
    }

    /// Writer with the default validator.
    pub fn open(options: WriterOptions) -> Self {
        Self::new(options, EventValidator::default())
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    pub fn validator(&self) -> &EventValidator {
        &self.validator
    }

    /// Origin tag embedded in every id this writer assigns.
    pub fn origin(&self) -> u32 {
        self.lock_state().ids.origin()
    }

    pub fn add_observer(&self, observer: Arc<dyn AppendObserver>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Path of the segment an event stamped at `at` belongs to.
    pub fn segment_path(&self, at: chrono::DateTime<Utc>) -> PathBuf {
        self.options.dir.join(segment_file_name(
            &self.options.stream,
            &self.options.rotation.window(at),
        ))
    }

    /// Append a fully formed event.
    ///
    /// The event is validated first; a rejected event never touches disk.
    pub fn append(&self, event: &Event) -> Result<(), WriteError> {
        self.validator.check(event)?;
        let line = event.to_line()?;

        let order = self.lock_state();
        self.write_line(&self.segment_path(event.timestamp), &line)?;
        self.enqueue(event.clone());
        drop(order);
        self.deliver();
        Ok(())
    }

    /// Stamp a draft with the next id and timestamp, then append it.
    pub fn emit(&self, draft: EventDraft) -> Result<Event, WriteError> {
        let mut state = self.lock_state();
        let (event_id, timestamp) = state.ids.next(Utc::now());
        let event = draft.into_event(event_id, timestamp);
        self.validator.check(&event)?;
        let line = event.to_line()?;

        self.write_line(&self.segment_path(event.timestamp), &line)?;
        tracing::debug!(event_id = %event.event_id, kind = %event.routing_key(), "event appended");
        self.enqueue(event.clone());
        drop(state);
        self.deliver();
        Ok(event)
    }

    /// Apply a retention policy to this writer's stream and record what
    /// was pruned as a `system.retention_applied` event.
    pub fn apply_retention(
        &self,
        policy: &RetentionPolicy,
        actor: &str,
    ) -> Result<Vec<PathBuf>, RetentionError> {
        let affected = policy.apply(&self.options.dir, &self.options.stream, Utc::now())?;
        if !affected.is_empty() {
            let paths: Vec<String> = affected.iter().map(|p| p.display().to_string()).collect();
            self.emit(
                EventDraft::new(namespaces::SYSTEM, "retention_applied", actor)
                    .with_payload(json!({"affected": paths, "mode": policy.mode})),
            )?;
        }
        Ok(affected)
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        // A panic in an observer must not wedge every later append.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, path: &Path, line: &str) -> Result<(), WriteError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| WriteError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| WriteError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        FileExt::lock_exclusive(&file).map_err(|source| WriteError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        let written = append_record(&file, line, self.options.fsync);
        if let Err(e) = FileExt::unlock(&file) {
            // Closing the handle below releases the lock regardless.
            tracing::warn!(path = %path.display(), error = %e, "failed to release append lock");
        }

        written.map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn lock_delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called with the state lock held, so the queue is in append order.
    fn enqueue(&self, event: Event) {
        self.lock_delivery().pending.push_back(event);
    }

    /// Drain the queue unless another call (possibly further up this
    /// thread's stack) is already draining it.
    fn deliver(&self) {
        {
            let mut delivery = self.lock_delivery();
            if delivery.active {
                return;
            }
            delivery.active = true;
        }
        let mut draining = Draining {
            writer: self,
            finished: false,
        };

        loop {
            let event = {
                let mut delivery = self.lock_delivery();
                match delivery.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        delivery.active = false;
                        draining.finished = true;
                        return;
                    }
                }
            };
            let observers: Vec<Arc<dyn AppendObserver>> = self
                .observers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            for observer in &observers {
                observer.on_append(&event);
            }
        }
    }
}

/// Hands the queue to the next caller if an observer panics mid-drain.
struct Draining<'a> {
    writer: &'a EventWriter,
    finished: bool,
}

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.lock_delivery().active = false;
        }
    }
}

impl Emitter for EventWriter {
    fn emit(&self, draft: EventDraft) -> Result<Event, WriteError> {
        EventWriter::emit(self, draft)
    }
}

/// Write one record in a single call; undo a partial write.
fn append_record(mut file: &File, line: &str, fsync: bool) -> std::io::Result<()> {
    let start = file.metadata()?.len();
    let mut record = Vec::with_capacity(line.len() + 1);
    record.extend_from_slice(line.as_bytes());
    record.push(b'\n');

    if let Err(e) = file.write_all(&record) {
        if let Err(truncate) = file.set_len(start) {
            tracing::error!(error = %truncate, "failed to truncate partial record");
        }
        return Err(e);
    }
    if fsync {
        file.sync_data()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::LogReader;
    use keel_events::{EventId, SchemaError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn draft(i: usize) -> EventDraft {
        EventDraft::new("git", "commit", "agent-1")
            .with_task("T-1")
            .with_payload(json!({"sha": format!("{:07x}", i)}))
    }

    fn read_back(writer: &EventWriter) -> Vec<Event> {
        let opts = writer.options();
        LogReader::new(&opts.dir, &opts.stream)
            .events(writer.validator())
            .unwrap()
            .0
    }

    #[test]
    fn emit_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()));

        let e1 = writer.emit(draft(1)).unwrap();
        let e2 = writer.emit(draft(2)).unwrap();

        assert_eq!(read_back(&writer), vec![e1, e2]);
    }

    #[test]
    fn ids_and_timestamps_are_non_decreasing() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()).with_fsync(false));
        for i in 0..200 {
            writer.emit(draft(i)).unwrap();
        }
        let events = read_back(&writer);
        assert_eq!(events.len(), 200);
        for pair in events.windows(2) {
            assert!(pair[0].event_id < pair[1].event_id);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn invalid_event_is_rejected_before_write() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()));

        // task.created requires a title.
        let err = writer
            .emit(EventDraft::new("task", "created", "agent-1"))
            .unwrap_err();
        assert!(matches!(err, WriteError::Schema(SchemaError::PayloadRejected { .. })));
        assert!(!err.is_transient());
        assert!(read_back(&writer).is_empty());
    }

    #[test]
    fn append_preserves_caller_identity() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()));
        let event = draft(9).into_event(
            EventId {
                micros: 1,
                origin: 2,
                seq: 3,
            },
            Utc::now(),
        );
        writer.append(&event).unwrap();
        assert_eq!(read_back(&writer), vec![event]);
    }

    #[test]
    fn segment_name_follows_rotation() {
        let dir = tempdir().unwrap();
        let writer = EventWriter::open(
            WriterOptions::new(dir.path())
                .with_stream("core")
                .with_rotation(RotationPeriod::Hourly),
        );
        let event = writer.emit(draft(1)).unwrap();
        let expected = format!(
            "events-core-{}.jsonl",
            event.timestamp.format("%Y%m%dT%H")
        );
        assert!(dir.path().join(expected).exists());
    }

    #[test]
    fn unwritable_directory_surfaces_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file in the way").unwrap();
        let writer = EventWriter::open(WriterOptions::new(blocker.join("events")));

        let err = writer.emit(draft(1)).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn observers_see_every_event_in_order() {
        struct Recorder(Mutex<Vec<EventId>>, AtomicUsize);
        impl AppendObserver for Recorder {
            fn on_append(&self, event: &Event) {
                self.0.lock().unwrap().push(event.event_id);
                self.1.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()).with_fsync(false));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new()), AtomicUsize::new(0)));
        writer.add_observer(recorder.clone());

        let written: Vec<EventId> = (0..10).map(|i| writer.emit(draft(i)).unwrap().event_id).collect();
        assert_eq!(*recorder.0.lock().unwrap(), written);

        // Rejected events are not announced.
        let _ = writer.emit(EventDraft::new("task", "created", "agent-1"));
        assert_eq!(recorder.1.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn observer_can_emit_through_the_same_writer() {
        struct FollowUp {
            writer: std::sync::OnceLock<std::sync::Weak<EventWriter>>,
            seen: Mutex<Vec<(String, EventId)>>,
        }
        impl AppendObserver for FollowUp {
            fn on_append(&self, event: &Event) {
                self.seen
                    .lock()
                    .unwrap()
                    .push((event.actor.clone(), event.event_id));
                if event.actor == "agent-1" {
                    let writer = self.writer.get().unwrap().upgrade().unwrap();
                    writer
                        .emit(
                            EventDraft::new("git", "commit", "follow-up")
                                .with_task("T-1")
                                .with_payload(json!({"sha": "f011040"})),
                        )
                        .unwrap();
                }
            }
        }

        let dir = tempdir().unwrap();
        let writer = Arc::new(EventWriter::open(
            WriterOptions::new(dir.path()).with_fsync(false),
        ));
        let observer = Arc::new(FollowUp {
            writer: std::sync::OnceLock::new(),
            seen: Mutex::new(Vec::new()),
        });
        observer.writer.set(Arc::downgrade(&writer)).unwrap();
        writer.add_observer(observer.clone());

        let first = writer.emit(draft(1)).unwrap();
        let second = writer.emit(draft(2)).unwrap();

        let written = read_back(&writer);
        assert_eq!(written.len(), 4);
        let seen = observer.seen.lock().unwrap().clone();
        let expected: Vec<(String, EventId)> = written
            .iter()
            .map(|e| (e.actor.clone(), e.event_id))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(seen[0].1, first.event_id);
        assert_eq!(seen[1].0, "follow-up");
        assert_eq!(seen[2].1, second.event_id);
    }

    #[test]
    fn panicking_observer_does_not_stall_later_deliveries() {
        struct Flaky(AtomicUsize);
        impl AppendObserver for Flaky {
            fn on_append(&self, _event: &Event) {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first delivery fails");
                }
            }
        }

        let dir = tempdir().unwrap();
        let writer = EventWriter::open(WriterOptions::new(dir.path()).with_fsync(false));
        let flaky = Arc::new(Flaky(AtomicUsize::new(0)));
        writer.add_observer(flaky.clone());

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            writer.emit(draft(1)).unwrap();
        }));
        assert!(caught.is_err());
        writer.emit(draft(2)).unwrap();
        assert_eq!(flaky.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_writers_share_a_segment_without_tearing() {
        let dir = tempdir().unwrap();
        let options = WriterOptions::new(dir.path()).with_fsync(false);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let writer = EventWriter::open(options.clone());
                std::thread::spawn(move || {
                    for i in 0..250 {
                        writer.emit(draft(i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let (events, rejected) = LogReader::new(dir.path(), "workflow")
            .events(&EventValidator::default())
            .unwrap();
        assert_eq!(events.len(), 1000);
        assert!(rejected.is_empty());
    }
}
