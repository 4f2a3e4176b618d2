//! Tailing engine for cwtail
//!
//! This crate polls any number of log sources, drops records already seen
//! on overlapping windows, and merges everything into one stream ordered by
//! timestamp.

mod clock;
mod cursor;
mod merge;
mod recent;
mod scheduler;
mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cursor::{CursorState, SourceCursor};
pub use merge::kway_merge;
pub use scheduler::{BackoffPolicy, MergeScheduler, SourceWarning, TickReport, WarningKind};
pub use session::{Batch, SessionState, TailConfig, TailError, TailSession};

// Re-export types used in our public API
pub use cwtail_types::{LogRecord, PollWindow, SourceError, SourceSpec};
