//! Property-based tests for correlation expiry and id reuse

mod test_utils;

use proptest::prelude::*;
use sbms_core::config::CorrelationConfig;
use sbms_core::correlation::{CorrelationTracker, SendOutcome};
use sbms_core::types::{CorrelationId, TimeSource, Timestamp};
use sbms_core::TrackerError;
use test_utils::MockTimeSource;

fn arb_id() -> impl Strategy<Value = CorrelationId> {
    any::<u32>().prop_map(|n| CorrelationId::parse(&format!("{n:08X}")).unwrap())
}

fn tracker_with_timeout(timeout_ms: u64) -> (CorrelationTracker<MockTimeSource>, MockTimeSource) {
    let clock = MockTimeSource::new();
    let config = CorrelationConfig {
        expiry_timeout_ms: timeout_ms,
        ..CorrelationConfig::default()
    };
    (CorrelationTracker::new(clock.clone(), config), clock)
}

proptest! {
    /// Property: an entry is never expired at or before its timeout and
    /// always expired strictly after it
    #[test]
    fn sweep_is_strictly_after_timeout(
        id in arb_id(),
        registered_at in 0u64..1_000_000,
        timeout in 1u64..120_000,
        probe in 0u64..240_000,
    ) {
        let (tracker, clock) = tracker_with_timeout(timeout);
        clock.set_time(registered_at);
        tracker.register(id, "+46701234567", "Hello").unwrap();

        let expired = tracker.sweep_expired(Timestamp::new(registered_at + probe));
        if probe > timeout {
            prop_assert_eq!(expired.len(), 1);
            prop_assert!(tracker.is_empty());
        } else {
            prop_assert!(expired.is_empty());
            prop_assert_eq!(tracker.len(), 1);
        }
    }

    /// Property: a second registration fails until the first is resolved
    #[test]
    fn duplicate_until_resolved(id in arb_id()) {
        let (tracker, _clock) = tracker_with_timeout(30_000);
        tracker.register(id.clone(), "+4670", "a").unwrap();
        let duplicate = matches!(
            tracker.register(id.clone(), "+4670", "a"),
            Err(TrackerError::DuplicateId { .. })
        );
        prop_assert!(duplicate);

        tracker.resolve_by_send(&id, SendOutcome::Sent).unwrap();
        prop_assert!(tracker.register(id, "+4670", "a").is_ok());
    }
}

#[test]
fn scenario_registered_at_zero_with_thirty_second_timeout() {
    let (tracker, clock) = tracker_with_timeout(30_000);
    let id = CorrelationId::parse("A3F7E2C1").unwrap();
    tracker.register(id, "+46701234567", "Hello").unwrap();
    assert_eq!(clock.now(), Timestamp::new(0));

    assert!(tracker.sweep_expired(Timestamp::from_secs(25)).is_empty());
    let expired = tracker.sweep_expired(Timestamp::from_secs(35));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id.as_str(), "A3F7E2C1");
}

#[test]
fn sweep_uses_tracker_clock() {
    let (tracker, clock) = tracker_with_timeout(1_000);
    tracker
        .register(CorrelationId::parse("0000ABCD").unwrap(), "+4670", "x")
        .unwrap();
    clock.advance(1_000);
    assert!(tracker.sweep().is_empty());
    clock.advance(1);
    assert_eq!(tracker.sweep().len(), 1);
}
