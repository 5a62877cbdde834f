//! Correlation tracking
//!
//! Links each accepted request to the status that eventually answers it. The
//! map lives behind one mutex that is held only for map operations, never
//! across sends or pushes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::CorrelationConfig;
use crate::errors::TrackerError;
use crate::protocol::record::Record;
use crate::types::{CorrelationId, StatusCode, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Correlation Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationState {
    /// Registered, the send primitive has not reported yet
    AwaitingSend,
    /// Sent, waiting for a status from the other side
    AwaitingStatus,
    /// Terminal outcome known, egress push pending
    Resolved,
    /// No terminal outcome within the timeout
    Expired,
}

/// Terminal result of the send primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed { reason: String },
}

impl SendOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        SendOutcome::Failed { reason: reason.into() }
    }

    /// Status reported back for this outcome
    pub fn status(&self) -> StatusCode {
        match self {
            SendOutcome::Sent => StatusCode::Sent,
            SendOutcome::Failed { .. } => StatusCode::Failed,
        }
    }
}

/// One in-flight request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrelation {
    pub id: CorrelationId,
    pub to: String,
    pub text: String,
    pub state: CorrelationState,
    pub created_at: Timestamp,
    pub outcome: Option<SendOutcome>,
}

impl PendingCorrelation {
    /// Still blocks its id from being registered again
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self.state,
            CorrelationState::AwaitingSend | CorrelationState::AwaitingStatus
        )
    }

    pub fn age(&self, now: Timestamp) -> u64 {
        now - self.created_at
    }
}

/// Result of matching a status response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResolution {
    pub correlation: PendingCorrelation,
    /// `None` when the peer sent a status value we do not know
    pub status: Option<StatusCode>,
}

/// Tracker statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub awaiting_send: usize,
    pub awaiting_status: usize,
    pub resolved: usize,
}

impl TrackerStats {
    pub fn total(&self) -> usize {
        self.awaiting_send + self.awaiting_status + self.resolved
    }
}

// ----------------------------------------------------------------------------
// Correlation Tracker
// ----------------------------------------------------------------------------

pub struct CorrelationTracker<T: TimeSource> {
    entries: Mutex<HashMap<CorrelationId, PendingCorrelation>>,
    time_source: T,
    config: CorrelationConfig,
}

impl<T: TimeSource> std::fmt::Debug for CorrelationTracker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTracker")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: TimeSource> CorrelationTracker<T> {
    pub fn new(time_source: T, config: CorrelationConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            time_source,
            config,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingCorrelation>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Start tracking a request
    ///
    /// A resolved entry still waiting for its egress push is replaced; an
    /// unresolved one is a `DuplicateId`.
    pub fn register(&self, id: CorrelationId, to: &str, text: &str) -> Result<PendingCorrelation, TrackerError> {
        let now = self.time_source.now();
        let mut entries = self.entries();

        if let Some(existing) = entries.get(&id) {
            if existing.is_unresolved() {
                error!(
                    "Duplicate correlation id {} (registered {}ms ago in state {:?})",
                    id,
                    existing.age(now),
                    existing.state
                );
                return Err(TrackerError::DuplicateId { id: id.to_string() });
            }
        }

        let entry = PendingCorrelation {
            id: id.clone(),
            to: to.to_string(),
            text: text.to_string(),
            state: CorrelationState::AwaitingSend,
            created_at: now,
            outcome: None,
        };
        entries.insert(id, entry.clone());
        Ok(entry)
    }

    /// Record the send primitive's outcome
    pub fn resolve_by_send(
        &self,
        id: &CorrelationId,
        outcome: SendOutcome,
    ) -> Result<PendingCorrelation, TrackerError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(id)
            .filter(|entry| entry.state == CorrelationState::AwaitingSend)
            .ok_or_else(|| TrackerError::NoSuchCorrelation { id: id.to_string() })?;

        entry.state = match outcome {
            SendOutcome::Sent if self.config.await_delivery_report => CorrelationState::AwaitingStatus,
            _ => CorrelationState::Resolved,
        };
        entry.outcome = Some(outcome);
        Ok(entry.clone())
    }

    /// Move an originated request to `AwaitingStatus` once the peer took it
    pub fn mark_awaiting_status(&self, id: &CorrelationId) -> Result<PendingCorrelation, TrackerError> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(id)
            .filter(|entry| entry.is_unresolved())
            .ok_or_else(|| TrackerError::NoSuchCorrelation { id: id.to_string() })?;
        entry.state = CorrelationState::AwaitingStatus;
        Ok(entry.clone())
    }

    /// Stop tracking an unresolved entry whose request never reached the peer
    ///
    /// Returns `None` when a status already resolved it.
    pub fn withdraw(&self, id: &CorrelationId) -> Option<PendingCorrelation> {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(entry) if entry.is_unresolved() => entries.remove(id),
            _ => None,
        }
    }

    /// Drop a resolved entry after its egress push was attempted
    pub fn finish(&self, id: &CorrelationId) -> Option<PendingCorrelation> {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(entry) if entry.state == CorrelationState::Resolved => entries.remove(id),
            _ => None,
        }
    }

    /// Match a status response to its request and stop tracking it
    pub fn resolve_by_status(&self, record: &Record) -> Result<StatusResolution, TrackerError> {
        let raw_id = record.id().unwrap_or_default();
        let not_found = || TrackerError::NoSuchCorrelation {
            id: raw_id.to_string(),
        };
        let id = record.correlation_id().map_err(|_| not_found())?;

        let mut correlation = self.entries().remove(&id).ok_or_else(not_found)?;
        correlation.state = CorrelationState::Resolved;
        let status = record.status();
        debug!("Correlation {} resolved by status {:?}", id, status);

        Ok(StatusResolution { correlation, status })
    }

    pub fn get(&self, id: &CorrelationId) -> Option<PendingCorrelation> {
        self.entries().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Expire every unresolved entry older than the timeout
    ///
    /// An entry expires only once its age is strictly greater than the
    /// timeout. Resolved entries past the timeout are dropped without being
    /// reported.
    pub fn sweep_expired(&self, now: Timestamp) -> Vec<PendingCorrelation> {
        let timeout = self.config.expiry_timeout_ms;
        let mut expired = Vec::new();

        self.entries().retain(|_, entry| {
            if entry.age(now) <= timeout {
                return true;
            }
            if entry.is_unresolved() {
                let mut gone = entry.clone();
                gone.state = CorrelationState::Expired;
                expired.push(gone);
            }
            false
        });

        expired.sort_by_key(|entry| entry.created_at);
        expired
    }

    /// `sweep_expired` at the tracker's current time
    pub fn sweep(&self) -> Vec<PendingCorrelation> {
        self.sweep_expired(self.time_source.now())
    }

    pub fn stats(&self) -> TrackerStats {
        let mut stats = TrackerStats::default();
        for entry in self.entries().values() {
            match entry.state {
                CorrelationState::AwaitingSend => stats.awaiting_send += 1,
                CorrelationState::AwaitingStatus => stats.awaiting_status += 1,
                CorrelationState::Resolved => stats.resolved += 1,
                CorrelationState::Expired => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualTimeSource;

    fn id(raw: &str) -> CorrelationId {
        CorrelationId::parse(raw).unwrap()
    }

    fn tracker() -> (CorrelationTracker<ManualTimeSource>, ManualTimeSource) {
        let clock = ManualTimeSource::new();
        let tracker = CorrelationTracker::new(clock.clone(), CorrelationConfig::default());
        (tracker, clock)
    }

    fn status(raw_id: &str, status: &str) -> Record {
        Record::from_fields([("id", raw_id), ("status", status)])
    }

    #[test]
    fn test_register_twice_is_duplicate() {
        let (tracker, _) = tracker();
        tracker.register(id("A3F7E2C1"), "+4670", "Hi").unwrap();
        assert_eq!(
            tracker.register(id("A3F7E2C1"), "+4670", "Hi"),
            Err(TrackerError::DuplicateId {
                id: "A3F7E2C1".to_string()
            })
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_status_resolves_registered_correlation() {
        let (tracker, _) = tracker();
        tracker.register(id("A3F7E2C1"), "+46701234567", "Hello").unwrap();
        tracker.mark_awaiting_status(&id("A3F7E2C1")).unwrap();

        let resolution = tracker.resolve_by_status(&status("A3F7E2C1", "SENT")).unwrap();
        assert_eq!(resolution.status, Some(StatusCode::Sent));
        assert_eq!(resolution.correlation.to, "+46701234567");
        assert_eq!(resolution.correlation.state, CorrelationState::Resolved);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_status_for_unknown_id() {
        let (tracker, _) = tracker();
        assert_eq!(
            tracker.resolve_by_status(&status("DEADBEEF", "SENT")),
            Err(TrackerError::NoSuchCorrelation {
                id: "DEADBEEF".to_string()
            })
        );
        let no_id = Record::from_fields([("status", "SENT")]);
        assert!(matches!(
            tracker.resolve_by_status(&no_id),
            Err(TrackerError::NoSuchCorrelation { .. })
        ));
    }

    #[test]
    fn test_expiry_is_strictly_after_timeout() {
        let (tracker, _) = tracker();
        tracker.register(id("A3F7E2C1"), "+4670", "Hi").unwrap();

        assert!(tracker.sweep_expired(Timestamp::from_secs(25)).is_empty());
        assert!(tracker.sweep_expired(Timestamp::from_secs(30)).is_empty());

        let expired = tracker.sweep_expired(Timestamp::from_secs(35));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, CorrelationState::Expired);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_id_reusable_after_resolution_or_expiry() {
        let (tracker, clock) = tracker();
        let first = id("A3F7E2C1");

        tracker.register(first.clone(), "+4670", "Hi").unwrap();
        tracker.resolve_by_send(&first, SendOutcome::Sent).unwrap();
        // Resolved but not yet finished
        tracker.register(first.clone(), "+4670", "Hi").unwrap();

        clock.advance(31_000);
        assert_eq!(tracker.sweep().len(), 1);
        tracker.register(first, "+4670", "Hi").unwrap();
    }

    #[test]
    fn test_resolve_by_send_respects_delivery_reports() {
        let clock = ManualTimeSource::new();
        let config = CorrelationConfig {
            await_delivery_report: true,
            ..CorrelationConfig::default()
        };
        let tracker = CorrelationTracker::new(clock, config);

        tracker.register(id("00000001"), "+4670", "a").unwrap();
        tracker.register(id("00000002"), "+4670", "b").unwrap();

        let sent = tracker.resolve_by_send(&id("00000001"), SendOutcome::Sent).unwrap();
        assert_eq!(sent.state, CorrelationState::AwaitingStatus);
        let failed = tracker
            .resolve_by_send(&id("00000002"), SendOutcome::failed("no signal"))
            .unwrap();
        assert_eq!(failed.state, CorrelationState::Resolved);
        assert_eq!(failed.outcome.unwrap().status(), StatusCode::Failed);

        assert_eq!(
            tracker.stats(),
            TrackerStats {
                awaiting_send: 0,
                awaiting_status: 1,
                resolved: 1
            }
        );
    }

    #[test]
    fn test_finish_removes_only_resolved() {
        let (tracker, _) = tracker();
        let key = id("A3F7E2C1");
        tracker.register(key.clone(), "+4670", "Hi").unwrap();
        assert!(tracker.finish(&key).is_none());

        tracker.resolve_by_send(&key, SendOutcome::Sent).unwrap();
        assert!(tracker.finish(&key).is_some());
        assert!(tracker.get(&key).is_none());
    }

    #[test]
    fn test_withdraw_only_unresolved() {
        let (tracker, _) = tracker();
        let key = id("A3F7E2C1");
        tracker.register(key.clone(), "+4670", "Hi").unwrap();
        tracker.mark_awaiting_status(&key).unwrap();
        assert_eq!(tracker.withdraw(&key).unwrap().state, CorrelationState::AwaitingStatus);
        assert!(tracker.is_empty());

        // Already matched by a status
        tracker.register(key.clone(), "+4670", "Hi").unwrap();
        tracker.resolve_by_status(&status("A3F7E2C1", "DELIVERED")).unwrap();
        assert!(tracker.withdraw(&key).is_none());

        tracker.register(key.clone(), "+4670", "Hi").unwrap();
        tracker.resolve_by_send(&key, SendOutcome::Sent).unwrap();
        assert!(tracker.withdraw(&key).is_none());
        assert!(tracker.get(&key).is_some());
    }

    #[test]
    fn test_stale_resolved_entries_are_dropped_silently() {
        let (tracker, clock) = tracker();
        let key = id("A3F7E2C1");
        tracker.register(key.clone(), "+4670", "Hi").unwrap();
        tracker.resolve_by_send(&key, SendOutcome::Sent).unwrap();

        clock.advance(60_000);
        assert!(tracker.sweep().is_empty());
        assert!(tracker.is_empty());
    }
}
