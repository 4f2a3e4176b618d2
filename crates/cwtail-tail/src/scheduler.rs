use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use cwtail_source::SourceClient;
use cwtail_types::{LogRecord, SourceError};

use crate::cursor::SourceCursor;
use crate::merge::kway_merge;

/// Exponential delay applied to a source after a retryable failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Longest delay between attempts
    pub cap: Duration,
    /// Consecutive failures tolerated before the source is failed
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// `base × 2^(attempt - 1)`, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_retries: 8,
        }
    }
}

/// What went wrong with one source during a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WarningKind {
    /// Will be retried after `retry_in`
    Retrying {
        error: SourceError,
        attempt: u32,
        retry_in: Duration,
    },
    /// No longer polled
    Failed(SourceError),
    /// Records that became visible more than `lookback` late, after newer
    /// output was already emitted; not shown
    LateRecords { count: usize },
}

/// A per-source problem surfaced alongside a tick's records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceWarning {
    pub source_id: String,
    pub alias: String,
    pub kind: WarningKind,
}

/// Result of one scheduler tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Records safe to emit, ascending by timestamp
    pub records: Vec<LogRecord>,
    pub warnings: Vec<SourceWarning>,
    /// New (deduplicated) records fetched this tick, including held-back ones
    pub fetched: usize,
    /// Polls that completed without error
    pub completed_polls: usize,
}

/// Polls a set of cursors and merges their output into one ordered stream
pub struct MergeScheduler {
    client: Arc<dyn SourceClient>,
    cursors: Vec<SourceCursor>,
    filter_pattern: Option<String>,
    backoff: BackoffPolicy,

    /// How long a record may take to become visible at its source
    lookback_millis: i64,

    /// Records not yet past the watermark, waiting for the next merge
    held: Vec<LogRecord>,

    /// Timestamp of the newest record emitted so far
    last_emitted: Option<i64>,
}

impl MergeScheduler {
    pub fn new(
        client: Arc<dyn SourceClient>,
        cursors: Vec<SourceCursor>,
        filter_pattern: Option<String>,
        backoff: BackoffPolicy,
        lookback_millis: i64,
    ) -> Self {
        Self {
            client,
            cursors,
            filter_pattern: filter_pattern.filter(|p| !p.is_empty()),
            backoff,
            lookback_millis: lookback_millis.max(0),
            held: Vec::new(),
            last_emitted: None,
        }
    }

    /// Poll every due cursor concurrently and emit what is safe to emit.
    ///
    /// Only records older than the watermark are emitted; the rest are held
    /// back and merged again on the next tick. See [`Self::watermark`].
    pub async fn tick(&mut self, now: i64) -> TickReport {
        let client = self.client.as_ref();
        let filter = self.filter_pattern.as_deref();

        let polls = self
            .cursors
            .iter_mut()
            .enumerate()
            .filter(|(_, cursor)| cursor.is_live() && cursor.is_due(now))
            .map(|(index, cursor)| async move { (index, cursor.poll(client, filter, now).await) });
        let results = join_all(polls).await;

        let mut report = TickReport::default();
        let mut runs = vec![std::mem::take(&mut self.held)];

        for (index, result) in results {
            match result {
                Ok(records) => {
                    report.completed_polls += 1;
                    report.fetched += records.len();
                    runs.push(records);
                }
                Err(error) => {
                    if let Some(warning) = self.handle_error(index, error, now) {
                        report.warnings.push(warning);
                    }
                }
            }
        }

        let watermark = self.watermark(now);
        let mut merged = kway_merge(runs);
        let cut = merged.partition_point(|r| r.timestamp_millis < watermark);
        self.held = merged.split_off(cut);

        let (records, late) = self.admit(merged);
        report.records = records;
        report.warnings.extend(late);

        tracing::debug!(
            now,
            watermark,
            emitted = report.records.len(),
            held = self.held.len(),
            fetched = report.fetched,
            "tick"
        );

        report
    }

    /// Timestamp below which no source can still deliver new records.
    ///
    /// A source may make a record visible up to `lookback` after its
    /// timestamp, and a cursor stopped by the page cap has not yet fetched
    /// anything past its `next_start`.
    pub fn watermark(&self, now: i64) -> i64 {
        self.cursors
            .iter()
            .filter_map(SourceCursor::backlog_start)
            .fold(now.saturating_sub(self.lookback_millis), i64::min)
    }

    /// Apply backoff or failure to a cursor after a poll error
    fn handle_error(&mut self, index: usize, error: SourceError, now: i64) -> Option<SourceWarning> {
        let cursor = self.cursors.get_mut(index)?;
        let source_id = cursor.source().name.clone();
        let alias = cursor.source().alias.clone();

        let kind = if error.is_retryable() {
            let attempt = cursor.failures() + 1;
            if attempt > self.backoff.max_retries {
                let reason = SourceError::SourceFailed(format!(
                    "gave up after {} attempts: {error}",
                    attempt - 1
                ));
                tracing::info!(source = %source_id, %error, "retries exhausted");
                cursor.fail(reason.clone());
                WarningKind::Failed(reason)
            } else {
                let retry_in = self.backoff.delay(attempt);
                cursor.defer(now.saturating_add(retry_in.as_millis() as i64));
                tracing::debug!(source = %source_id, %error, attempt, ?retry_in, "backing off");
                WarningKind::Retrying {
                    error,
                    attempt,
                    retry_in,
                }
            }
        } else {
            // The cursor already marked itself failed
            WarningKind::Failed(error)
        };

        Some(SourceWarning {
            source_id,
            alias,
            kind,
        })
    }

    /// Keep output non-decreasing: drop anything older than what was emitted
    fn admit(&mut self, records: Vec<LogRecord>) -> (Vec<LogRecord>, Vec<SourceWarning>) {
        let floor = self.last_emitted;
        let mut late: BTreeMap<(String, String), usize> = BTreeMap::new();

        let records: Vec<LogRecord> = records
            .into_iter()
            .filter(|r| {
                if floor.is_some_and(|f| r.timestamp_millis < f) {
                    *late
                        .entry((r.source_id.clone(), r.alias.clone()))
                        .or_default() += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        if let Some(last) = records.last() {
            self.last_emitted = Some(last.timestamp_millis);
        }

        let warnings = late
            .into_iter()
            .map(|((source_id, alias), count)| {
                tracing::info!(source = %source_id, count, "dropped late records");
                SourceWarning {
                    source_id,
                    alias,
                    kind: WarningKind::LateRecords { count },
                }
            })
            .collect();

        (records, warnings)
    }

    /// Release every held-back record; used once no further polls will happen
    pub fn drain(&mut self) -> Vec<LogRecord> {
        let held = std::mem::take(&mut self.held);
        self.admit(held).0
    }

    /// True when there are sources and every one of them failed
    pub fn all_failed(&self) -> bool {
        !self.cursors.is_empty() && self.cursors.iter().all(SourceCursor::is_failed)
    }

    /// True when no cursor will be polled again
    pub fn all_settled(&self) -> bool {
        !self.cursors.iter().any(SourceCursor::is_live)
    }

    /// True when every live cursor has drained at least one window
    pub fn caught_up(&self) -> bool {
        self.cursors
            .iter()
            .filter(|c| c.is_live())
            .all(SourceCursor::has_polled)
    }

    pub fn live_count(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_live()).count()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn cursors(&self) -> &[SourceCursor] {
        &self.cursors
    }

    /// Failure reasons of every failed cursor
    pub fn failures(&self) -> Vec<(String, SourceError)> {
        self.cursors
            .iter()
            .filter_map(|c| match c.state() {
                crate::CursorState::Failed(error) => Some((c.source().name.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwtail_source::InMemorySource;
    use cwtail_types::{PollWindow, SourceSpec};

    fn scheduler(
        source: Arc<InMemorySource>,
        names: &[&str],
        backoff: BackoffPolicy,
        lookback_millis: i64,
    ) -> MergeScheduler {
        let cursors = names
            .iter()
            .map(|name| SourceCursor::new(SourceSpec::named(*name), 0, lookback_millis))
            .collect();
        MergeScheduler::new(source, cursors, None, backoff, lookback_millis)
    }

    fn stamps(records: &[LogRecord]) -> Vec<(&str, i64)> {
        records
            .iter()
            .map(|r| (r.source_id.as_str(), r.timestamp_millis))
            .collect()
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_millis(500),
            max_retries: 5,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_tick_merges_sources_in_order() {
        let source = Arc::new(InMemorySource::new());
        for ts in [100, 105, 110] {
            source.push("A", ts, "a");
        }
        for ts in [102, 108] {
            source.push("B", ts, "b");
        }

        let mut scheduler = scheduler(source, &["A", "B"], BackoffPolicy::default(), 50);
        let report = scheduler.tick(200).await;

        assert_eq!(
            stamps(&report.records),
            vec![("A", 100), ("B", 102), ("A", 105), ("B", 108), ("A", 110)]
        );
        assert_eq!(report.completed_polls, 2);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_records_within_lookback_are_held_back() {
        let source = Arc::new(InMemorySource::new());
        source.push("A", 50, "old");
        source.push("A", 950, "recent");

        let mut scheduler = scheduler(source.clone(), &["A"], BackoffPolicy::default(), 100);
        let report = scheduler.tick(1_000).await;
        assert_eq!(stamps(&report.records), vec![("A", 50)]);
        assert_eq!(scheduler.held_count(), 1);
        assert_eq!(scheduler.watermark(1_000), 900);

        // Visible late, but still ahead of everything emitted
        source.push("A", 930, "lagging");
        let report = scheduler.tick(1_100).await;
        assert_eq!(stamps(&report.records), vec![("A", 930), ("A", 950)]);
        assert!(report.warnings.is_empty());
        assert_eq!(source.calls()[1].window, PollWindow::new(850, 1_100));

        assert!(scheduler.drain().is_empty());
    }

    #[tokio::test]
    async fn test_page_capped_source_holds_back_others() {
        let source = Arc::new(InMemorySource::new().with_page_size(1));
        for ts in 0..150 {
            source.push("A", ts, &format!("a{ts}"));
        }
        source.push("B", 900, "b");

        let mut scheduler = scheduler(source, &["A", "B"], BackoffPolicy::default(), 10);
        let first = scheduler.tick(1_000).await;

        // A stopped at the page cap, so nothing from B may pass it yet
        assert_eq!(first.records.len(), 99);
        assert!(first.records.iter().all(|r| r.source_id == "A"));
        assert_eq!(scheduler.watermark(1_000), 99);

        let second = scheduler.tick(2_000).await;
        assert!(second.warnings.is_empty());

        let all: Vec<_> = first.records.iter().chain(&second.records).collect();
        assert_eq!(all.iter().filter(|r| r.source_id == "A").count(), 150);
        assert_eq!(all.last().map(|r| r.timestamp_millis), Some(900));
        assert!(all.windows(2).all(|w| w[0].timestamp_millis <= w[1].timestamp_millis));
    }

    #[tokio::test]
    async fn test_rate_limited_source_does_not_block_others() {
        let source = Arc::new(InMemorySource::new());
        source.push("A", 50, "a");
        source.push("B", 20, "b");
        source.fail_next("B", SourceError::RateLimited, 1);

        let mut scheduler = scheduler(source.clone(), &["A", "B"], BackoffPolicy::default(), 10);
        let report = scheduler.tick(100).await;

        assert_eq!(stamps(&report.records), vec![("A", 50)]);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0].kind,
            WarningKind::Retrying { attempt: 1, .. }
        ));

        // Still backing off 500ms later
        scheduler.tick(600).await;
        assert_eq!(source.call_count("B"), 1);
        // B's record at 20 is further behind A's emitted record than the lookback
        let report = scheduler.tick(1_100).await;
        assert_eq!(source.call_count("B"), 2);
        assert!(report.records.is_empty());
        assert!(matches!(
            report.warnings[0].kind,
            WarningKind::LateRecords { count: 1 }
        ));
    }

    #[tokio::test]
    async fn test_retry_cap_fails_source() {
        let source = Arc::new(InMemorySource::new());
        source.add_source("A");
        source.push("B", 5, "b");
        source.fail_next("A", SourceError::Transient("reset".into()), 10);

        let policy = BackoffPolicy {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(10),
            max_retries: 2,
        };
        let mut scheduler = scheduler(source, &["A", "B"], policy, 10);

        let mut now = 100;
        let mut failed = false;
        for _ in 0..5 {
            let report = scheduler.tick(now).await;
            failed |= report
                .warnings
                .iter()
                .any(|w| w.source_id == "A" && matches!(w.kind, WarningKind::Failed(_)));
            now += 100;
        }

        assert!(failed);
        assert_eq!(scheduler.live_count(), 1);
        assert!(!scheduler.all_failed());
        assert_eq!(scheduler.failures().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_isolated() {
        let source = Arc::new(InMemorySource::new());
        source.push("A", 10, "a");

        let mut scheduler = scheduler(source, &["A", "missing"], BackoffPolicy::default(), 10);
        let report = scheduler.tick(100).await;

        assert_eq!(report.records.len(), 1);
        assert!(matches!(
            report.warnings[0].kind,
            WarningKind::Failed(SourceError::SourceNotFound(_))
        ));
        assert_eq!(scheduler.live_count(), 1);
    }
}
