//! Periodic correlation sweep
//!
//! Runs `RelayOrchestrator::sweep` on a fixed interval, independent of
//! traffic, until the returned handle is aborted or the runtime shuts down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use sbms_core::TimeSource;

use crate::orchestrator::RelayOrchestrator;

/// Spawn the sweeper task
pub fn spawn_sweeper<T>(orchestrator: Arc<RelayOrchestrator<T>>, period: Duration) -> JoinHandle<()>
where
    T: TimeSource + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Correlation sweeper started (every {:?})", period);

        loop {
            ticker.tick().await;
            let expired = orchestrator.sweep();
            if !expired.is_empty() {
                debug!("Sweep expired {} correlations", expired.len());
            }
        }
    })
}
