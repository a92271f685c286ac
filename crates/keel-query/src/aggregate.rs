// aggregate.rs — Counts, groupings and time series over events.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use keel_events::Event;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Group label used for events that lack the grouped field.
pub const NONE_LABEL: &str = "<none>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Namespace,
    /// Full routing key, `namespace.type`.
    Kind,
    Actor,
    Task,
    Correlation,
}

impl GroupKey {
    pub fn label(self, event: &Event) -> String {
        match self {
            GroupKey::Namespace => event.namespace.clone(),
            GroupKey::Kind => event.routing_key(),
            GroupKey::Actor => event.actor.clone(),
            GroupKey::Task => event
                .task_id
                .clone()
                .unwrap_or_else(|| NONE_LABEL.to_string()),
            GroupKey::Correlation => event.correlation_id.to_string(),
        }
    }
}

impl FromStr for GroupKey {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" | "ns" => Ok(GroupKey::Namespace),
            "type" | "kind" => Ok(GroupKey::Kind),
            "actor" => Ok(GroupKey::Actor),
            "task" | "task_id" => Ok(GroupKey::Task),
            "correlation" | "correlation_id" => Ok(GroupKey::Correlation),
            other => Err(QueryError::UnknownGroupKey(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Minute,
    Hour,
    Day,
}

impl Bucket {
    fn width(self) -> Duration {
        match self {
            Bucket::Minute => Duration::minutes(1),
            Bucket::Hour => Duration::hours(1),
            Bucket::Day => Duration::days(1),
        }
    }

    /// Start of the bucket containing `at`.
    pub fn floor(self, at: DateTime<Utc>) -> DateTime<Utc> {
        // Only fails for timestamps near the representable limits.
        at.duration_trunc(self.width()).unwrap_or(at)
    }
}

impl FromStr for Bucket {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" | "m" => Ok(Bucket::Minute),
            "hour" | "h" => Ok(Bucket::Hour),
            "day" | "d" => Ok(Bucket::Day),
            other => Err(QueryError::UnknownBucket(other.to_string())),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bucket::Minute => "minute",
            Bucket::Hour => "hour",
            Bucket::Day => "day",
        })
    }
}

pub fn count_by<'a, I>(events: I, key: GroupKey) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut counts = BTreeMap::new();
    for event in events {
        *counts.entry(key.label(event)).or_insert(0) += 1;
    }
    counts
}

/// Events per group, each group in input order.
pub fn group_by<'a, I>(events: I, key: GroupKey) -> BTreeMap<String, Vec<Event>>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut groups: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for event in events {
        groups.entry(key.label(event)).or_default().push(event.clone());
    }
    groups
}

/// Event counts per time bucket. Empty buckets are omitted.
pub fn time_series<'a, I>(events: I, bucket: Bucket) -> BTreeMap<DateTime<Utc>, usize>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut series = BTreeMap::new();
    for event in events {
        *series.entry(bucket.floor(event.timestamp)).or_insert(0) += 1;
    }
    series
}
