//! Relay Orchestrator
//!
//! Routes every inbound record to its action:
//!
//! - requests are validated, registered, handed to the send primitive and
//!   answered with a status record pushed back over a fresh session
//! - status records resolve the correlation of a request we originated
//! - anything else is logged and dropped
//!
//! The orchestrator never returns an error from `on_inbound_bytes`; what
//! happened is reported through `InboundOutcome`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use sbms_core::protocol::correlation_id::generate_with;
use sbms_core::protocol::record::{self, Record, RecordKind};
use sbms_core::protocol::validation::{normalize_address, validate_request, validate_text, ValidatedRequest};
use sbms_core::{
    object_name, CorrelationId, CorrelationTracker, ObexSession, PendingCorrelation, Priority, PushResult,
    SbmsConfig, SbmsError, SendOutcome, SessionState, StatusCode, TimeSource, TrackerError, TrackerStats,
    TransportAdapter, ValidationError,
};

use crate::collaborators::SendPrimitive;
use crate::dedup::CompletedRelays;
use crate::errors::RuntimeError;
use crate::history::{HistoryEntry, InMemoryHistory, MessageDirection, MessageHistory, MessageStatus};

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

/// What `on_inbound_bytes` did with a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Bytes did not frame as a record
    Malformed,
    /// Well-framed record of unknown kind
    Ignored,
    /// Request failed validation and was not sent
    Rejected { reason: ValidationError },
    /// Request was sent and its status pushed (or the push was given up)
    Relayed {
        id: CorrelationId,
        status: StatusCode,
        status_pushed: bool,
    },
    /// Another request with this id is still in flight
    Duplicate { id: CorrelationId },
    /// Request was already relayed; its stored status was pushed again
    Replayed {
        id: CorrelationId,
        status: StatusCode,
        status_pushed: bool,
    },
    /// Status resolved one of our correlations
    StatusMatched {
        id: CorrelationId,
        status: Option<StatusCode>,
    },
    /// Status for an id we are not tracking
    StatusUnmatched { id: String },
}

/// Orchestrator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub tracker: TrackerStats,
    pub completed_relays: usize,
}

// ----------------------------------------------------------------------------
// Relay Orchestrator
// ----------------------------------------------------------------------------

pub struct RelayOrchestrator<T: TimeSource> {
    config: SbmsConfig,
    tracker: CorrelationTracker<T>,
    completed: Mutex<CompletedRelays>,
    sender: Arc<dyn SendPrimitive>,
    transport: Arc<dyn TransportAdapter>,
    history: Arc<dyn MessageHistory>,
    /// Serialises egress so at most one session is open
    egress: tokio::sync::Mutex<()>,
}

impl<T: TimeSource> std::fmt::Debug for RelayOrchestrator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayOrchestrator")
            .field("transport", &self.transport.describe())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<T: TimeSource> RelayOrchestrator<T> {
    /// Create an orchestrator with an in-memory history
    pub fn new(
        config: SbmsConfig,
        time_source: T,
        sender: Arc<dyn SendPrimitive>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Self {
        let tracker = CorrelationTracker::new(time_source, config.correlation.clone());
        let completed = Mutex::new(CompletedRelays::new(config.relay.dedup_window_ms));
        Self {
            config,
            tracker,
            completed,
            sender,
            transport,
            history: Arc::new(InMemoryHistory::new()),
            egress: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a different history backend
    pub fn with_history(mut self, history: Arc<dyn MessageHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn config(&self) -> &SbmsConfig {
        &self.config
    }

    pub fn tracker(&self) -> &CorrelationTracker<T> {
        &self.tracker
    }

    pub fn history(&self) -> &Arc<dyn MessageHistory> {
        &self.history
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            tracker: self.tracker.stats(),
            completed_relays: self.completed().len(),
        }
    }

    fn completed(&self) -> MutexGuard<'_, CompletedRelays> {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Ingress
    // ------------------------------------------------------------------------

    /// Process one inbound unit to completion
    pub async fn on_inbound_bytes(&self, bytes: &[u8]) -> InboundOutcome {
        let record = match record::decode(bytes) {
            Ok(record) => record,
            Err(err) => {
                warn!("Discarding inbound unit of {} bytes: {}", bytes.len(), err);
                return InboundOutcome::Malformed;
            }
        };

        match record.kind() {
            RecordKind::Request => self.handle_request(record).await,
            RecordKind::StatusResponse => self.handle_status(&record),
            RecordKind::Unknown => {
                debug!("Ignoring record without request or status tags: {:?}", record.fields());
                InboundOutcome::Ignored
            }
        }
    }

    async fn handle_request(&self, record: Record) -> InboundOutcome {
        let request = match validate_request(&record, &self.config.validation) {
            Ok(request) => request,
            Err(reason) => return self.reject(&record, reason).await,
        };
        let id = request.id.clone();

        let previous = self.completed().lookup(&id, self.tracker.now());
        if let Some(status) = previous {
            info!("Request {} was already relayed, re-sending status {}", id, status);
            let status_pushed = self.push_status(&id, status).await;
            return InboundOutcome::Replayed {
                id,
                status,
                status_pushed,
            };
        }

        match self.tracker.register(id.clone(), &request.to, &request.text) {
            Ok(_) => {}
            Err(TrackerError::DuplicateId { .. }) => return InboundOutcome::Duplicate { id },
            Err(err) => {
                error!("Failed to register {}: {}", id, err);
                return InboundOutcome::Duplicate { id };
            }
        }
        self.log_history(HistoryEntry::new(
            Some(id.clone()),
            MessageDirection::Inbound,
            &request.to,
            &request.text,
            MessageStatus::Pending,
        ));

        let outcome = self.send(&request).await;
        let status = outcome.status();
        if let Err(err) = self.tracker.resolve_by_send(&id, outcome) {
            warn!("Correlation {} vanished before its send outcome: {}", id, err);
        }
        self.set_history_status(&id, status.into());
        self.completed().remember(id.clone(), status, self.tracker.now());

        let status_pushed = self.push_status(&id, status).await;
        self.tracker.finish(&id);

        InboundOutcome::Relayed {
            id,
            status,
            status_pushed,
        }
    }

    async fn reject(&self, record: &Record, reason: ValidationError) -> InboundOutcome {
        warn!("Rejecting request {:?}: {}", record.id(), reason);
        let id = record.correlation_id().ok();
        self.log_history(HistoryEntry::new(
            id.clone(),
            MessageDirection::Inbound,
            record.to().unwrap_or_default(),
            record.text().unwrap_or_default(),
            MessageStatus::Rejected,
        ));

        if self.config.relay.reply_on_rejection {
            match id {
                Some(id) => {
                    self.push_status(&id, StatusCode::Rejected).await;
                }
                None => debug!("No usable id to address a rejection to"),
            }
        }
        InboundOutcome::Rejected { reason }
    }

    async fn send(&self, request: &ValidatedRequest) -> SendOutcome {
        let timeout = self.config.relay.send_timeout();
        match tokio::time::timeout(timeout, self.sender.send(&request.to, &request.text)).await {
            Ok(SendOutcome::Sent) => {
                info!("Sent {} to {}", request.id, request.to);
                SendOutcome::Sent
            }
            Ok(SendOutcome::Failed { reason }) => {
                warn!("Sending {} to {} failed: {}", request.id, request.to, reason);
                SendOutcome::Failed { reason }
            }
            Err(_) => {
                warn!("Sending {} timed out after {:?}", request.id, timeout);
                SendOutcome::failed(format!("timed out after {}ms", self.config.relay.send_timeout_ms))
            }
        }
    }

    fn handle_status(&self, record: &Record) -> InboundOutcome {
        match self.tracker.resolve_by_status(record) {
            Ok(resolution) => {
                let id = resolution.correlation.id;
                match resolution.status {
                    Some(status) => {
                        info!("Status {} for {} to {}", status, id, resolution.correlation.to);
                        self.set_history_status(&id, status.into());
                    }
                    None => warn!("Unknown status value {:?} for {}", record.get("status"), id),
                }
                InboundOutcome::StatusMatched {
                    id,
                    status: resolution.status,
                }
            }
            Err(err) => {
                debug!("Unmatched status: {}", err);
                InboundOutcome::StatusUnmatched {
                    id: record.id().unwrap_or_default().to_string(),
                }
            }
        }
    }

    /// Report a network delivery result for a request kept open with
    /// `await_delivery_report`
    pub async fn on_delivery_report(&self, id: &CorrelationId, delivered: bool) -> Result<bool, RuntimeError> {
        let status = if delivered { StatusCode::Delivered } else { StatusCode::Failed };
        let record = Record::status_response(id, status, Utc::now());
        let resolution = self.tracker.resolve_by_status(&record)?;
        debug!("Delivery report for {} to {}: {}", id, resolution.correlation.to, status);

        self.set_history_status(id, status.into());
        self.completed().remember(id.clone(), status, self.tracker.now());
        Ok(self.push_status(id, status).await)
    }

    // ------------------------------------------------------------------------
    // Originating Role
    // ------------------------------------------------------------------------

    /// Build a request for `to`, push it to the peer and track its status
    pub async fn originate(&self, to: &str, text: &str) -> Result<CorrelationId, RuntimeError> {
        self.originate_with(to, text, Priority::Normal).await
    }

    pub async fn originate_with(&self, to: &str, text: &str, priority: Priority) -> Result<CorrelationId, RuntimeError> {
        let to = normalize_address(to, &self.config.validation)?;
        validate_text(text, &self.config.validation)?;

        let now = Utc::now();
        let id = generate_with(self.config.correlation.id_digest, &to, text, now.timestamp());
        self.tracker.register(id.clone(), &to, text)?;
        // The peer may answer before it acknowledges the push
        self.tracker.mark_awaiting_status(&id)?;
        self.log_history(HistoryEntry::new(
            Some(id.clone()),
            MessageDirection::Outbound,
            &to,
            text,
            MessageStatus::Pending,
        ));

        let request = Record::request(&to, text, &id, priority, now);
        if self.push_with_retry(&object_name(id.as_str()), &record::encode(&request)).await {
            self.set_history_status(&id, MessageStatus::Sent);
            info!("Request {} for {} handed to peer", id, to);
            return Ok(id);
        }

        if self.tracker.withdraw(&id).is_none() {
            info!("Request {} was answered although its push failed", id);
            return Ok(id);
        }
        self.set_history_status(&id, MessageStatus::Failed);
        Err(RuntimeError::PushFailed {
            id,
            attempts: self.config.relay.max_push_attempts,
        })
    }

    // ------------------------------------------------------------------------
    // Egress
    // ------------------------------------------------------------------------

    async fn push_status(&self, id: &CorrelationId, status: StatusCode) -> bool {
        let response = Record::status_response(id, status, Utc::now());
        self.push_with_retry(&object_name(id.as_str()), &record::encode(&response))
            .await
    }

    /// Push over a fresh session per attempt; `false` once all attempts failed
    async fn push_with_retry(&self, name: &str, payload: &[u8]) -> bool {
        let _egress = self.egress.lock().await;
        let attempts = self.config.relay.max_push_attempts.max(1);

        for attempt in 1..=attempts {
            match self.push_once(name, payload).await {
                Ok(PushResult::Accepted) => {
                    debug!("Peer accepted {} on attempt {}", name, attempt);
                    return true;
                }
                Ok(PushResult::Rejected(code)) => {
                    warn!("Peer rejected {} (attempt {}/{}): {}", name, attempt, attempts, code);
                }
                Err(err) => {
                    warn!("Push of {} failed (attempt {}/{}): {}", name, attempt, attempts, err);
                }
            }
        }

        error!(
            "Giving up on {} after {} attempts to {}",
            name,
            attempts,
            self.transport.describe()
        );
        false
    }

    async fn push_once(&self, name: &str, payload: &[u8]) -> Result<PushResult, SbmsError> {
        let stream = self.transport.open().await?;
        let session = ObexSession::open(stream, &self.config.session).await?;
        let result = session.push(name, payload).await;

        if session.state() == SessionState::Error {
            debug!("Discarding failed session without disconnect");
        } else {
            session.close().await;
        }
        Ok(result?)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Expire stale correlations and prune the duplicate cache
    ///
    /// Expired requests keep their "sent" history status: sent, unconfirmed.
    pub fn sweep(&self) -> Vec<PendingCorrelation> {
        let expired = self.tracker.sweep();
        for entry in &expired {
            info!(
                "Correlation {} to {} expired after {}ms without a status",
                entry.id,
                entry.to,
                self.config.correlation.expiry_timeout_ms
            );
        }

        let pruned = self.completed().prune(self.tracker.now());
        if pruned > 0 {
            debug!("Pruned {} completed relays", pruned);
        }
        expired
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    fn log_history(&self, entry: HistoryEntry) {
        if let Err(err) = self.history.record(entry) {
            warn!("Failed to record history: {}", err);
        }
    }

    fn set_history_status(&self, id: &CorrelationId, status: MessageStatus) {
        match self.history.update_status(id, status) {
            Ok(true) => {}
            Ok(false) => debug!("No history entry for {}", id),
            Err(err) => warn!("Failed to update history for {}: {}", id, err),
        }
    }
}
