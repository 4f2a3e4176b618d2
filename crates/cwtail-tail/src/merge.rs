use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use cwtail_types::LogRecord;

/// Head of one run inside the merge heap
#[derive(Debug, PartialEq, Eq)]
struct Head {
    timestamp_millis: i64,
    source_id: String,
    run: usize,
}

impl Ord for Head {
    // Reversed so the max-heap pops the earliest head
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp_millis
            .cmp(&self.timestamp_millis)
            .then_with(|| other.source_id.cmp(&self.source_id))
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge runs that are each sorted by timestamp into one sorted sequence.
///
/// Equal timestamps keep each run's internal order, then order by source id,
/// then by run position.
pub fn kway_merge(runs: Vec<Vec<LogRecord>>) -> Vec<LogRecord> {
    let total = runs.iter().map(Vec::len).sum();
    let mut runs: Vec<VecDeque<LogRecord>> = runs.into_iter().map(VecDeque::from).collect();
    let mut heap = BinaryHeap::with_capacity(runs.len());

    for (run, records) in runs.iter().enumerate() {
        if let Some(first) = records.front() {
            heap.push(head(first, run));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Head { run, .. }) = heap.pop() {
        let Some(record) = runs[run].pop_front() else {
            continue;
        };
        merged.push(record);
        if let Some(next) = runs[run].front() {
            heap.push(head(next, run));
        }
    }

    merged
}

fn head(record: &LogRecord, run: usize) -> Head {
    Head {
        timestamp_millis: record.timestamp_millis,
        source_id: record.source_id.clone(),
        run,
    }
}
