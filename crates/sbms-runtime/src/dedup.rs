//! Duplicate-delivery cache
//!
//! OPP peers re-send an object when they miss our acknowledgment. The cache
//! remembers which ids were already relayed, and with which status, for a
//! fixed window so a re-delivered request is answered without sending the
//! message a second time.

use std::collections::HashMap;

use sbms_core::{CorrelationId, StatusCode, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CompletedRelay {
    status: StatusCode,
    completed_at: Timestamp,
}

/// Recently completed relays keyed by correlation id
#[derive(Debug)]
pub struct CompletedRelays {
    window_ms: u64,
    entries: HashMap<CorrelationId, CompletedRelay>,
}

impl CompletedRelays {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: HashMap::new(),
        }
    }

    /// Remember (or update) the status reported for `id`
    pub fn remember(&mut self, id: CorrelationId, status: StatusCode, now: Timestamp) {
        self.entries.insert(
            id,
            CompletedRelay {
                status,
                completed_at: now,
            },
        );
    }

    /// Status of a relay completed within the window
    pub fn lookup(&self, id: &CorrelationId, now: Timestamp) -> Option<StatusCode> {
        self.entries
            .get(id)
            .filter(|entry| now - entry.completed_at <= self.window_ms)
            .map(|entry| entry.status)
    }

    /// Drop entries older than the window, returning how many were removed
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        let window = self.window_ms;
        self.entries.retain(|_, entry| now - entry.completed_at <= window);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
