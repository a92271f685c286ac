// pattern.rs — `namespace.type` routing patterns.
//
// Patterns are glob expressions over the routing key:
//   "git.*"        every git event
//   "*.created"    every creation event in any namespace
//   "task.created" exactly one type
//   "*"            everything
// A bare namespace ("git") is shorthand for "git.*".

use std::fmt;
use std::str::FromStr;

use glob::Pattern;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PatternError;
use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    source: String,
    /// `None` for the match-everything pattern.
    glob: Option<Pattern>,
}

impl EventPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(PatternError {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }
        let expanded = if trimmed == "*" || trimmed.contains('.') {
            trimmed.to_string()
        } else {
            format!("{}.*", trimmed)
        };
        if expanded == "*" {
            return Ok(Self::any());
        }
        if expanded.split('.').count() != 2 {
            return Err(PatternError {
                pattern: pattern.to_string(),
                reason: "expected 'namespace.type'".to_string(),
            });
        }
        let glob = Pattern::new(&expanded).map_err(|e| PatternError {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;
        Ok(Self {
            source: expanded,
            glob: Some(glob),
        })
    }

    /// Matches every event.
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            glob: None,
        }
    }

    pub fn matches_key(&self, routing_key: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.matches(routing_key),
            None => true,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.matches_key(&event.routing_key())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for EventPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventPattern::new(s)
    }
}

impl Serialize for EventPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for EventPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventPattern::new(&s).map_err(serde::de::Error::custom)
    }
}
