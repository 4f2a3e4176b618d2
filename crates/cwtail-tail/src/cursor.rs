use cwtail_source::SourceClient;
use cwtail_types::{LogRecord, PollWindow, SourceError, SourceSpec};

use crate::recent::RecentIds;

/// Upper bound on pages followed within one poll
const MAX_PAGES_PER_POLL: usize = 100;

/// Lifecycle of a cursor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorState {
    /// Still being polled
    Live,
    /// Everything up to the session's end bound has been fetched
    Exhausted,
    /// Permanently failed, no longer polled
    Failed(SourceError),
}

/// Per-source polling state
pub struct SourceCursor {
    source: SourceSpec,

    /// Newest timestamp fetched so far (or the session start)
    next_start_millis: i64,

    /// Windows never start before this
    since_millis: i64,

    /// How far each window reaches back before `next_start_millis`
    lookback_millis: i64,

    /// The last window was cut short by the page cap
    truncated: bool,

    /// End of the last fully drained window
    polled_through: Option<i64>,

    /// Session end bound (exclusive)
    to_millis: Option<i64>,

    /// Windows never extend past this (end bound or catch-up point)
    end_cap: Option<i64>,

    recent: RecentIds,
    state: CursorState,

    /// Consecutive retryable failures
    failures: u32,

    /// Not polled again before this instant
    retry_at: Option<i64>,
}

impl SourceCursor {
    pub fn new(source: SourceSpec, since_millis: i64, lookback_millis: i64) -> Self {
        Self {
            source,
            next_start_millis: since_millis,
            since_millis,
            lookback_millis: lookback_millis.max(0),
            truncated: false,
            polled_through: None,
            to_millis: None,
            end_cap: None,
            recent: RecentIds::new(lookback_millis),
            state: CursorState::Live,
            failures: 0,
            retry_at: None,
        }
    }

    /// Stop once everything before `to_millis` has been fetched
    pub fn with_end(mut self, to_millis: Option<i64>) -> Self {
        self.to_millis = to_millis;
        self.end_cap = min_opt(self.end_cap, to_millis);
        self
    }

    /// Never request records newer than `catch_up_millis`
    pub fn with_catch_up(mut self, catch_up_millis: Option<i64>) -> Self {
        self.end_cap = min_opt(self.end_cap, catch_up_millis);
        self
    }

    /// Fetch everything new since the last poll, up to `now`.
    ///
    /// The window reaches `lookback` behind the newest record already
    /// fetched, so records the source makes visible late are still picked
    /// up; repeats are dropped by identity. Returns the records not seen on
    /// an earlier poll, ascending by timestamp. A retryable error leaves the
    /// cursor untouched; any other error fails it permanently.
    pub async fn poll(
        &mut self,
        client: &dyn SourceClient,
        filter_pattern: Option<&str>,
        now: i64,
    ) -> Result<Vec<LogRecord>, SourceError> {
        if self.state != CursorState::Live {
            return Ok(Vec::new());
        }

        if self.to_millis.is_some_and(|to| self.next_start_millis >= to) {
            tracing::debug!(source = %self.source.name, "reached end bound");
            self.state = CursorState::Exhausted;
            return Ok(Vec::new());
        }

        let window = self.window(now);
        if window.is_empty() {
            // Nothing can exist in the window, so it counts as drained
            self.polled_through = Some(self.polled_through.map_or(window.end_millis, |p| p.max(window.end_millis)));
            self.truncated = false;
            return Ok(Vec::new());
        }

        let (fetched, drained) = match self.fetch_window(client, window, filter_pattern).await {
            Ok(result) => result,
            Err(error) => {
                if !error.is_retryable() {
                    tracing::info!(source = %self.source.name, %error, "source failed");
                    self.state = CursorState::Failed(error.clone());
                }
                return Err(error);
            }
        };

        let total = fetched.len();
        let newest = fetched.iter().map(|r| r.timestamp_millis).max();

        let mut fresh = Vec::with_capacity(total);
        for mut record in fetched {
            if self.recent.insert(record.timestamp_millis, record.identity()) {
                record.alias.clone_from(&self.source.alias);
                fresh.push(record);
            }
        }
        self.recent.evict();
        fresh.sort_by_key(|r| r.timestamp_millis);

        if let Some(newest) = newest {
            self.next_start_millis = self.next_start_millis.max(newest);
        }
        self.truncated = !drained;
        if drained {
            self.polled_through = Some(window.end_millis);
            if self.to_millis.is_some_and(|to| window.end_millis >= to) {
                self.state = CursorState::Exhausted;
            }
        }
        self.failures = 0;
        self.retry_at = None;

        tracing::debug!(
            source = %self.source.name,
            %window,
            fetched = total,
            fresh = fresh.len(),
            next_start = self.next_start_millis,
            "polled"
        );

        Ok(fresh)
    }

    /// Page through one window; the flag is false if the page cap cut it short
    async fn fetch_window(
        &self,
        client: &dyn SourceClient,
        window: PollWindow,
        filter_pattern: Option<&str>,
    ) -> Result<(Vec<LogRecord>, bool), SourceError> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;

        for _ in 0..MAX_PAGES_PER_POLL {
            let page = client
                .fetch_page(&self.source.name, window, filter_pattern, token.as_deref())
                .await?;
            records.extend(page.records);

            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok((records, true)),
            }
        }

        tracing::warn!(
            source = %self.source.name,
            %window,
            pages = MAX_PAGES_PER_POLL,
            "page limit reached, continuing on next poll"
        );
        Ok((records, false))
    }

    /// The window the next poll at `now` would request
    pub fn window(&self, now: i64) -> PollWindow {
        let end = self.end_cap.map_or(now, |cap| cap.min(now));
        let start = if self.truncated {
            // Pick up where the page cap stopped
            self.next_start_millis
        } else {
            self.next_start_millis
                .saturating_sub(self.lookback_millis)
                .max(self.since_millis)
        };
        PollWindow::new(start, end)
    }

    /// Where unfetched records of a page-capped window begin, if any
    pub fn backlog_start(&self) -> Option<i64> {
        (self.is_live() && self.truncated).then_some(self.next_start_millis)
    }

    /// Count a retryable failure and hold off polling until `retry_at`
    pub fn defer(&mut self, retry_at: i64) -> u32 {
        self.failures += 1;
        self.retry_at = Some(retry_at);
        self.failures
    }

    /// Stop polling this source for good
    pub fn fail(&mut self, error: SourceError) {
        self.state = CursorState::Failed(error);
        self.retry_at = None;
    }

    /// Whether a backoff delay (if any) has elapsed
    pub fn is_due(&self, now: i64) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    pub fn is_live(&self) -> bool {
        self.state == CursorState::Live
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, CursorState::Failed(_))
    }

    /// Whether at least one window has been fully drained
    pub fn has_polled(&self) -> bool {
        self.polled_through.is_some()
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn next_start_millis(&self) -> i64 {
        self.next_start_millis
    }

    pub fn polled_through(&self) -> Option<i64> {
        self.polled_through
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn retry_at(&self) -> Option<i64> {
        self.retry_at
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
