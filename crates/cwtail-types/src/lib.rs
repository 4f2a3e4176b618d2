//! Shared types for cwtail
//!
//! This crate contains data structures used across multiple cwtail crates.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Source Types
// ============================================================================

/// A log source to tail, with the alias it is displayed under
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceSpec {
    /// Short display tag
    pub alias: String,
    /// Concrete log group name
    pub name: String,
}

impl SourceSpec {
    pub fn new(alias: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
        }
    }

    /// A source displayed under its own name
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
        }
    }
}

/// Named groups of sources tailed together, loaded once at startup
#[derive(Clone, Debug, Default)]
pub struct LogSets {
    sets: HashMap<String, Vec<SourceSpec>>,
}

impl LogSets {
    pub fn new(sets: HashMap<String, Vec<SourceSpec>>) -> Self {
        Self { sets }
    }

    /// Sources of a set, in configured order
    pub fn get(&self, name: &str) -> Option<&[SourceSpec]> {
        self.sets.get(name).map(Vec::as_slice)
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Time range `[start_millis, end_millis)` requested from a source on one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollWindow {
    pub start_millis: i64,
    pub end_millis: i64,
}

impl PollWindow {
    pub fn new(start_millis: i64, end_millis: i64) -> Self {
        Self {
            start_millis,
            end_millis,
        }
    }

    pub fn contains(&self, timestamp_millis: i64) -> bool {
        timestamp_millis >= self.start_millis && timestamp_millis < self.end_millis
    }

    pub fn is_empty(&self) -> bool {
        self.start_millis >= self.end_millis
    }
}

impl fmt::Display for PollWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_millis, self.end_millis)
    }
}

/// Identity used to drop records seen on an earlier, overlapping poll
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordIdentity {
    /// Event id supplied by the source
    Event(String),
    /// Derived when the source supplies no id
    Synthetic {
        source_id: String,
        timestamp_millis: i64,
        message: String,
    },
}

/// A single log record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Originating log source (log group name)
    pub source_id: String,

    /// Display tag of the source
    pub alias: String,

    /// Source-provided timestamp, epoch milliseconds
    pub timestamp_millis: i64,

    /// Source-unique event id (if any)
    pub event_id: Option<String>,

    /// Raw text payload
    pub message: String,

    /// Log stream within the group (if known)
    pub stream: Option<String>,
}

impl LogRecord {
    /// Create a record displayed under its source id
    pub fn new(source_id: impl Into<String>, timestamp_millis: i64, message: impl Into<String>) -> Self {
        let source_id = source_id.into();
        Self {
            alias: source_id.clone(),
            source_id,
            timestamp_millis,
            event_id: None,
            message: message.into(),
            stream: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Dedup identity: the event id, or one derived from source, time and message
    pub fn identity(&self) -> RecordIdentity {
        match &self.event_id {
            Some(id) => RecordIdentity::Event(id.clone()),
            None => RecordIdentity::Synthetic {
                source_id: self.source_id.clone(),
                timestamp_millis: self.timestamp_millis,
                message: self.message.clone(),
            },
        }
    }

    /// Timestamp as a UTC datetime (None if out of range)
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_millis).single()
    }
}

/// One page of a paginated fetch
#[derive(Clone, Debug, Default)]
pub struct FetchPage {
    pub records: Vec<LogRecord>,
    /// Present when more pages remain for the same window
    pub next_token: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a log source
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("rate limited by remote API")]
    RateLimited,

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("log source not found: {0}")]
    SourceNotFound(String),

    #[error("log source failed: {0}")]
    SourceFailed(String),
}

impl SourceError {
    /// Whether the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}
