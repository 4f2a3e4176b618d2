use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use cwtail_source::SourceClient;
use cwtail_types::{LogRecord, SourceError, SourceSpec};

use crate::clock::Clock;
use crate::cursor::SourceCursor;
use crate::scheduler::{BackoffPolicy, MergeScheduler, SourceWarning};

/// Settings for one tail session
#[derive(Clone, Debug)]
pub struct TailConfig {
    /// Earliest record timestamp to fetch, epoch millis
    pub since_millis: i64,

    /// Stop once everything before this instant has been emitted
    pub to_millis: Option<i64>,

    /// Passed to the source verbatim
    pub filter_pattern: Option<String>,

    /// Keep polling after catching up
    pub keep_open: bool,

    /// Pause between ticks
    pub poll_interval: Duration,

    /// Longest delay between a record's timestamp and its visibility at the
    /// source; windows overlap by this much and output trails `now` by it
    pub lookback: Duration,

    pub backoff: BackoffPolicy,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            since_millis: 0,
            to_millis: None,
            filter_pattern: None,
            keep_open: true,
            poll_interval: Duration::from_secs(1),
            lookback: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Where the session is in its poll/sleep cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Polling,
    Sleeping,
    /// No more polls; held-back records are flushed next
    Draining,
    Done,
}

/// Records emitted together, with any per-source warnings of that tick
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<LogRecord>,
    pub warnings: Vec<SourceWarning>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.warnings.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("no log sources to tail")]
    NoSources,

    #[error("all log sources failed: {}", describe_failures(.0))]
    AllSourcesFailed(Vec<(String, SourceError)>),
}

fn describe_failures(failures: &[(String, SourceError)]) -> String {
    failures
        .iter()
        .map(|(source, error)| format!("{source}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Drives a merge scheduler through repeated poll/sleep cycles
pub struct TailSession {
    scheduler: MergeScheduler,
    clock: Arc<dyn Clock>,
    config: TailConfig,
    state: SessionState,
    cancel: CancellationToken,
    ticks: u64,
    pending_error: Option<TailError>,
}

impl TailSession {
    /// Create a session with one cursor per source.
    ///
    /// Without keep-open, windows are capped at the moment the session is
    /// created, so the run ends after a single catch-up.
    pub fn new(
        client: Arc<dyn SourceClient>,
        clock: Arc<dyn Clock>,
        sources: Vec<SourceSpec>,
        config: TailConfig,
    ) -> Result<Self, TailError> {
        if sources.is_empty() {
            return Err(TailError::NoSources);
        }

        let catch_up = (!config.keep_open).then(|| clock.now_millis());
        let lookback_millis = config.lookback.as_millis() as i64;
        let cursors = sources
            .into_iter()
            .map(|source| {
                SourceCursor::new(source, config.since_millis, lookback_millis)
                    .with_end(config.to_millis)
                    .with_catch_up(catch_up)
            })
            .collect();

        let scheduler = MergeScheduler::new(
            client,
            cursors,
            config.filter_pattern.clone(),
            config.backoff.clone(),
            lookback_millis,
        );

        Ok(Self {
            scheduler,
            clock,
            config,
            state: SessionState::Polling,
            cancel: CancellationToken::new(),
            ticks: 0,
            pending_error: None,
        })
    }

    /// Stop the session when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Next non-empty batch, or None once the session is done.
    ///
    /// A tick that has started always runs to completion; cancellation is
    /// observed between ticks and discards the tick's output.
    pub async fn next_batch(&mut self) -> Option<Result<Batch, TailError>> {
        loop {
            match self.state {
                SessionState::Done => return self.pending_error.take().map(Err),

                SessionState::Sleeping => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => self.state = SessionState::Done,
                        _ = self.clock.sleep(self.config.poll_interval) => self.state = SessionState::Polling,
                    }
                }

                SessionState::Polling => {
                    if self.cancel.is_cancelled() {
                        self.state = SessionState::Done;
                        continue;
                    }

                    let now = self.clock.now_millis();
                    let report = self.scheduler.tick(now).await;
                    self.ticks += 1;

                    if self.cancel.is_cancelled() {
                        self.state = SessionState::Done;
                        continue;
                    }

                    self.state = self.after_tick(report.fetched);
                    tracing::debug!(tick = self.ticks, state = ?self.state, "tick complete");

                    let batch = Batch {
                        records: report.records,
                        warnings: report.warnings,
                    };
                    if !batch.is_empty() {
                        return Some(Ok(batch));
                    }
                }

                SessionState::Draining => {
                    let records = self.scheduler.drain();
                    self.state = SessionState::Done;
                    if !records.is_empty() {
                        return Some(Ok(Batch {
                            records,
                            warnings: Vec::new(),
                        }));
                    }
                }
            }
        }
    }

    /// Decide the state following a tick
    fn after_tick(&mut self, fetched: usize) -> SessionState {
        if self.scheduler.all_failed() {
            self.pending_error = Some(TailError::AllSourcesFailed(self.scheduler.failures()));
            return SessionState::Draining;
        }
        if self.scheduler.all_settled() {
            tracing::debug!("every source reached the end bound");
            return SessionState::Draining;
        }
        if !self.config.keep_open && fetched == 0 && self.scheduler.caught_up() {
            tracing::debug!("caught up, not keeping open");
            return SessionState::Draining;
        }
        SessionState::Sleeping
    }

    /// The session as a stream of batches
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch, TailError>> {
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next_batch().await?;
            Some((item, session))
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn scheduler(&self) -> &MergeScheduler {
        &self.scheduler
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
