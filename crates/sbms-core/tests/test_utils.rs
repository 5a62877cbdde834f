//! Test utilities for deterministic testing of the SBMS core

use sbms_core::types::{TimeSource, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source whose clones share one clock
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    /// Create a new mock time source starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance time by the specified number of milliseconds
    #[allow(dead_code)]
    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }

    /// Set the time to a specific value
    #[allow(dead_code)]
    pub fn set_time(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}
