//! In-memory log source
//!
//! Holds records per source and serves them through the same paginated
//! contract as the remote client. Failures can be queued per source to
//! exercise retry and isolation paths.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{SourceCatalog, SourceClient};
use cwtail_types::{FetchPage, LogRecord, PollWindow, SourceError};

/// A recorded `fetch_page` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchCall {
    pub source_id: String,
    pub window: PollWindow,
    pub token: Option<String>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Vec<LogRecord>>,
    failures: HashMap<String, VecDeque<SourceError>>,
    calls: Vec<FetchCall>,
}

/// Log source backed by in-process storage
pub struct InMemorySource {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: 100,
        }
    }

    /// Limit the number of records per page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Register a source with no records
    pub fn add_source(&self, source_id: &str) {
        self.inner
            .lock()
            .records
            .entry(source_id.to_string())
            .or_default();
    }

    /// Remove a source; later fetches fail with `SourceNotFound`
    pub fn remove_source(&self, source_id: &str) {
        self.inner.lock().records.remove(source_id);
    }

    /// Append a record, keeping the source ordered by timestamp
    pub fn push(&self, source_id: &str, timestamp_millis: i64, message: &str) {
        self.push_record(LogRecord::new(source_id, timestamp_millis, message));
    }

    /// Append a record with a source-supplied event id
    pub fn push_event(&self, source_id: &str, timestamp_millis: i64, event_id: &str, message: &str) {
        self.push_record(LogRecord::new(source_id, timestamp_millis, message).with_event_id(event_id));
    }

    pub fn push_record(&self, record: LogRecord) {
        let mut inner = self.inner.lock();
        let records = inner.records.entry(record.source_id.clone()).or_default();
        let at = records.partition_point(|r| r.timestamp_millis <= record.timestamp_millis);
        records.insert(at, record);
    }

    /// Fail the next `times` fetches for a source with `error`
    pub fn fail_next(&self, source_id: &str, error: SourceError, times: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.failures.entry(source_id.to_string()).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// All fetch calls so far, in order
    pub fn calls(&self) -> Vec<FetchCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of fetch calls made for a source
    pub fn call_count(&self, source_id: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.source_id == source_id)
            .count()
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    async fn fetch_page(
        &self,
        source_id: &str,
        window: PollWindow,
        filter_pattern: Option<&str>,
        pagination_token: Option<&str>,
    ) -> Result<FetchPage, SourceError> {
        let mut inner = self.inner.lock();
        inner.calls.push(FetchCall {
            source_id: source_id.to_string(),
            window,
            token: pagination_token.map(str::to_string),
        });

        if let Some(error) = inner.failures.get_mut(source_id).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        let Some(records) = inner.records.get(source_id) else {
            return Err(SourceError::SourceNotFound(source_id.to_string()));
        };

        let offset: usize = match pagination_token {
            Some(token) => token
                .parse()
                .map_err(|_| SourceError::SourceFailed(format!("bad pagination token {token}")))?,
            None => 0,
        };

        let matching: Vec<&LogRecord> = records
            .iter()
            .filter(|r| window.contains(r.timestamp_millis))
            .filter(|r| match filter_pattern {
                Some(pattern) if !pattern.is_empty() => r.message.contains(pattern),
                _ => true,
            })
            .collect();

        let page: Vec<LogRecord> = matching
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(|r| (*r).clone())
            .collect();
        let consumed = offset + page.len();
        let next_token = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(FetchPage {
            records: page,
            next_token,
        })
    }
}

#[async_trait]
impl SourceCatalog for InMemorySource {
    async fn list_sources(&self, pattern: Option<&str>) -> Result<Vec<String>, SourceError> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .records
            .keys()
            .filter(|name| pattern.is_none_or(|p| name.contains(p)))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}
