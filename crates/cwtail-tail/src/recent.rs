use std::collections::{HashSet, VecDeque};

use cwtail_types::RecordIdentity;

/// Identities seen within the lookback interval
///
/// Entries are kept in arrival order and evicted once their timestamp falls
/// more than `lookback_millis` behind the newest timestamp seen.
#[derive(Debug)]
pub struct RecentIds {
    lookback_millis: i64,
    order: VecDeque<(i64, RecordIdentity)>,
    seen: HashSet<RecordIdentity>,
    newest_millis: Option<i64>,
}

impl RecentIds {
    pub fn new(lookback_millis: i64) -> Self {
        Self {
            lookback_millis: lookback_millis.max(0),
            order: VecDeque::new(),
            seen: HashSet::new(),
            newest_millis: None,
        }
    }

    /// Record an identity; false if it was already present
    pub fn insert(&mut self, timestamp_millis: i64, identity: RecordIdentity) -> bool {
        if !self.seen.insert(identity.clone()) {
            return false;
        }
        self.order.push_back((timestamp_millis, identity));
        self.newest_millis = Some(
            self.newest_millis
                .map_or(timestamp_millis, |n| n.max(timestamp_millis)),
        );
        true
    }

    /// Drop identities older than the lookback interval, returning how many
    pub fn evict(&mut self) -> usize {
        let Some(newest) = self.newest_millis else {
            return 0;
        };
        let cutoff = newest.saturating_sub(self.lookback_millis);

        let mut evicted = 0;
        while let Some((ts, _)) = self.order.front() {
            if *ts >= cutoff {
                break;
            }
            if let Some((_, identity)) = self.order.pop_front() {
                self.seen.remove(&identity);
                evicted += 1;
            }
        }
        evicted
    }
}
