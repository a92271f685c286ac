// query.rs — Pattern + filter queries over a log or an in-memory slice.
//
// Log queries stream record by record and keep only matching events, so
// memory is bounded by the result (or by the limit), never by the log.
// Records that fail validation are counted and skipped.

use std::collections::VecDeque;

use keel_events::{Event, EventFilter, EventPattern, EventValidator};
use keel_log::LogReader;
use serde::Serialize;

use crate::aggregate::{self, Bucket, GroupKey};
use crate::error::QueryError;

/// Which end of the stream a limit keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LimitFrom {
    /// The earliest matches.
    #[default]
    Start,
    /// The latest matches, still returned oldest first.
    End,
}

#[derive(Debug, Clone)]
pub struct EventQuery {
    pub pattern: EventPattern,
    pub filter: EventFilter,
    pub limit: Option<usize>,
    pub limit_from: LimitFrom,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new(EventPattern::any())
    }
}

impl EventQuery {
    pub fn new(pattern: EventPattern) -> Self {
        Self {
            pattern,
            filter: EventFilter::default(),
            limit: None,
            limit_from: LimitFrom::Start,
        }
    }

    /// Query events whose routing key matches a glob such as `git.*`.
    pub fn parse(pattern: &str) -> Result<Self, QueryError> {
        Ok(Self::new(EventPattern::new(pattern)?))
    }

    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Keep at most `n` matches, the first `n` in log order.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self.limit_from = LimitFrom::Start;
        self
    }

    /// Keep at most `n` matches, the last `n` in log order.
    pub fn latest(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self.limit_from = LimitFrom::End;
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.pattern.matches(event) && self.filter.matches(event)
    }

    /// Stream every segment of a log.
    pub fn run_log(
        &self,
        reader: &LogReader,
        validator: &EventValidator,
    ) -> Result<QueryResult, QueryError> {
        let mut collector = Collector::new(self);
        for record in reader.records()? {
            let record = record?;
            collector.scanned += 1;
            match record.parse(validator) {
                Ok(event) => {
                    if collector.offer(event) {
                        break;
                    }
                }
                Err(error) => {
                    tracing::debug!(location = %record.location, error = %error, "query skipped record");
                    collector.skipped += 1;
                }
            }
        }
        Ok(collector.finish())
    }

    /// Query events already in memory, such as an index handler snapshot.
    pub fn run_events<'a, I>(&self, events: I) -> QueryResult
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut collector = Collector::new(self);
        for event in events {
            collector.scanned += 1;
            if collector.offer(event.clone()) {
                break;
            }
        }
        collector.finish()
    }
}

struct Collector<'q> {
    query: &'q EventQuery,
    matched: VecDeque<Event>,
    total_matches: usize,
    scanned: usize,
    skipped: usize,
}

impl<'q> Collector<'q> {
    fn new(query: &'q EventQuery) -> Self {
        Self {
            query,
            matched: VecDeque::new(),
            total_matches: 0,
            scanned: 0,
            skipped: 0,
        }
    }

    /// Returns true once no later event can change the result.
    fn offer(&mut self, event: Event) -> bool {
        if !self.query.matches(&event) {
            return false;
        }
        self.total_matches += 1;
        match (self.query.limit, self.query.limit_from) {
            (Some(0), _) => true,
            // Stop at the first match past the limit: it proves the
            // result is truncated without reading the rest of the log.
            (Some(n), LimitFrom::Start) => {
                if self.matched.len() == n {
                    return true;
                }
                self.matched.push_back(event);
                false
            }
            (Some(n), LimitFrom::End) => {
                if self.matched.len() == n {
                    self.matched.pop_front();
                }
                self.matched.push_back(event);
                false
            }
            (None, _) => {
                self.matched.push_back(event);
                false
            }
        }
    }

    fn finish(self) -> QueryResult {
        QueryResult {
            truncated: self.total_matches > self.matched.len(),
            events: self.matched.into(),
            scanned: self.scanned,
            skipped: self.skipped,
        }
    }
}

/// Matching events in log order, plus scan bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub events: Vec<Event>,
    /// Records read, valid or not.
    pub scanned: usize,
    /// Records that failed validation.
    pub skipped: usize,
    /// More events matched than were kept.
    pub truncated: bool,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn count_by(&self, key: GroupKey) -> std::collections::BTreeMap<String, usize> {
        aggregate::count_by(&self.events, key)
    }

    pub fn group_by(&self, key: GroupKey) -> std::collections::BTreeMap<String, Vec<Event>> {
        aggregate::group_by(&self.events, key)
    }

    pub fn time_series(
        &self,
        bucket: Bucket,
    ) -> std::collections::BTreeMap<chrono::DateTime<chrono::Utc>, usize> {
        aggregate::time_series(&self.events, bucket)
    }
}
