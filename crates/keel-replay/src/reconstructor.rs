// reconstructor.rs — Fold the log into a WorkflowState.
//
// Replay is tolerant: a record that fails validation, or an event a
// reducer refuses, becomes a ReplayWarning and the fold moves on. Only an
// I/O error reading the log itself stops a replay.

use std::fmt;

use keel_events::schema::peek_event_id;
use keel_events::{Event, EventId, EventValidator};
use keel_log::{LogReader, LogRecord, ReadError, RecordLocation};
use serde::Serialize;

use crate::reducer;
use crate::state::WorkflowState;

/// A record replay skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayWarning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<RecordLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub reason: String,
}

impl fmt::Display for ReplayWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}", location)?,
            None => f.write_str("<memory>")?,
        }
        write!(
            f,
            " (event {}): {}",
            self.event_id.as_deref().unwrap_or("<unknown>"),
            self.reason
        )
    }
}

/// Result of a replay: the state plus where it stopped.
///
/// An outcome doubles as a checkpoint: pass it to
/// [`Reconstructor::resume`] to fold only what was appended since.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub state: WorkflowState,
    /// Id of the last valid event reached, folded or refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<EventId>,
    /// Last record read from the log, valid or not. Resuming starts after
    /// it, so a corrupt record is only ever reported once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<RecordLocation>,
    /// Events folded into `state`.
    pub applied: usize,
    pub warnings: Vec<ReplayWarning>,
}

impl ReplayOutcome {
    fn warn(&mut self, warning: ReplayWarning) {
        tracing::warn!(
            location = ?warning.location.as_ref().map(ToString::to_string),
            event_id = ?warning.event_id,
            reason = %warning.reason,
            "replay skipped record"
        );
        self.warnings.push(warning);
    }

    fn fold(&mut self, event: &Event, location: Option<RecordLocation>) {
        self.cursor = Some(event.event_id);
        match reducer::apply(&mut self.state, event) {
            Ok(()) => self.applied += 1,
            Err(reason) => self.warn(ReplayWarning {
                location,
                event_id: Some(event.event_id.to_string()),
                reason,
            }),
        }
    }
}

/// Where a fold starts reading.
enum Start {
    Beginning,
    AfterEvent(EventId),
    AfterRecord(RecordLocation),
}

#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
    validator: EventValidator,
}

impl Reconstructor {
    pub fn new(validator: EventValidator) -> Self {
        Self { validator }
    }

    /// Replay raw records in order.
    ///
    /// With `from`, only records after the one whose id is `from` are
    /// folded. If no record carries that id, nothing is folded and a
    /// warning says so.
    pub fn replay<I>(&self, records: I, from: Option<&EventId>) -> Result<ReplayOutcome, ReadError>
    where
        I: IntoIterator<Item = Result<LogRecord, ReadError>>,
    {
        let start = match from {
            Some(id) => Start::AfterEvent(*id),
            None => Start::Beginning,
        };
        self.fold_records(ReplayOutcome::default(), records, start)
    }

    /// Replay every segment of a stream.
    pub fn replay_log(
        &self,
        reader: &LogReader,
        from: Option<&EventId>,
    ) -> Result<ReplayOutcome, ReadError> {
        self.replay(reader.records()?, from)
    }

    /// Continue from a previous outcome, folding only records after the
    /// last one it read. An outcome built from in-memory events has no
    /// record position and resumes after its cursor instead.
    pub fn resume<I>(&self, checkpoint: ReplayOutcome, records: I) -> Result<ReplayOutcome, ReadError>
    where
        I: IntoIterator<Item = Result<LogRecord, ReadError>>,
    {
        let start = match (&checkpoint.position, checkpoint.cursor) {
            (Some(position), _) => Start::AfterRecord(position.clone()),
            (None, Some(cursor)) => Start::AfterEvent(cursor),
            (None, None) => Start::Beginning,
        };
        self.fold_records(checkpoint, records, start)
    }

    /// Fold already-validated events.
    pub fn replay_events(&self, events: &[Event]) -> ReplayOutcome {
        let mut outcome = ReplayOutcome::default();
        for event in events {
            outcome.fold(event, None);
        }
        outcome
    }

    fn fold_records<I>(
        &self,
        mut outcome: ReplayOutcome,
        records: I,
        start: Start,
    ) -> Result<ReplayOutcome, ReadError>
    where
        I: IntoIterator<Item = Result<LogRecord, ReadError>>,
    {
        let marker = match &start {
            Start::AfterEvent(id) => Some(id.to_string()),
            _ => None,
        };
        let mut folding = marker.is_none();

        for record in records {
            let record = record?;
            if let Start::AfterRecord(position) = &start {
                if record.location <= *position {
                    continue;
                }
            }
            outcome.position = Some(record.location.clone());
            if !folding {
                folding = peek_event_id(&record.text).as_deref() == marker.as_deref();
                continue;
            }
            match record.parse(&self.validator) {
                Ok(event) => outcome.fold(&event, Some(record.location)),
                Err(error) => {
                    let warning = ReplayWarning {
                        event_id: peek_event_id(&record.text),
                        location: Some(record.location),
                        reason: error.to_string(),
                    };
                    outcome.warn(warning);
                }
            }
        }

        if !folding {
            outcome.warn(ReplayWarning {
                location: None,
                event_id: marker,
                reason: "checkpoint event not found in log; nothing replayed".to_string(),
            });
        }
        Ok(outcome)
    }
}

/// Replay events with the default validator.
pub fn replay_events(events: &[Event]) -> ReplayOutcome {
    Reconstructor::default().replay_events(events)
}
