//! Message history
//!
//! User-visible log of every relayed or originated message and the last status
//! known for it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use sbms_core::{CorrelationId, StatusCode};

use crate::errors::HistoryError;

// ----------------------------------------------------------------------------
// History Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// Received from a peer to be sent on the cellular network
    Inbound,
    /// Originated locally and pushed to a peer
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Rejected,
}

impl MessageStatus {
    /// No later update moves a message back from this status to pending or sent
    pub fn is_final(&self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Rejected)
    }
}

impl From<StatusCode> for MessageStatus {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::Sent => MessageStatus::Sent,
            StatusCode::Failed => MessageStatus::Failed,
            StatusCode::Delivered => MessageStatus::Delivered,
            StatusCode::Rejected => MessageStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub correlation_id: Option<CorrelationId>,
    pub direction: MessageDirection,
    pub address: String,
    pub text: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        correlation_id: Option<CorrelationId>,
        direction: MessageDirection,
        address: &str,
        text: &str,
        status: MessageStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            entry_id: Uuid::new_v4(),
            correlation_id,
            direction,
            address: address.to_string(),
            text: text.to_string(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

// ----------------------------------------------------------------------------
// History Trait
// ----------------------------------------------------------------------------

pub trait MessageHistory: Send + Sync {
    /// Append a new entry
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError>;

    /// Update the newest entry for `id`; returns whether one was found
    ///
    /// A final status is never replaced by a non-final one.
    fn update_status(&self, id: &CorrelationId, status: MessageStatus) -> Result<bool, HistoryError>;

    /// Snapshot of every entry, oldest first
    fn entries(&self) -> Vec<HistoryEntry>;

    /// Newest entry for `id`
    fn find(&self, id: &CorrelationId) -> Option<HistoryEntry> {
        self.entries()
            .into_iter()
            .rev()
            .find(|entry| entry.correlation_id.as_ref() == Some(id))
    }
}

fn update_newest(entries: &mut [HistoryEntry], id: &CorrelationId, status: MessageStatus) -> bool {
    match entries
        .iter_mut()
        .rev()
        .find(|entry| entry.correlation_id.as_ref() == Some(id))
    {
        Some(entry) if entry.status.is_final() && !status.is_final() => {
            debug!("Keeping {:?} for {} instead of {:?}", entry.status, id, status);
            true
        }
        Some(entry) => {
            entry.status = status;
            entry.updated_at = Utc::now();
            true
        }
        None => false,
    }
}

// ----------------------------------------------------------------------------
// In-Memory History
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageHistory for InMemoryHistory {
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
        Ok(())
    }

    fn update_status(&self, id: &CorrelationId, status: MessageStatus) -> Result<bool, HistoryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(update_newest(&mut entries, id, status))
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ----------------------------------------------------------------------------
// JSON File History
// ----------------------------------------------------------------------------

/// History persisted as a pretty-printed JSON array
///
/// The whole file is rewritten on every change through a temporary sibling
/// file, so a crash never leaves a truncated history behind.
#[derive(Debug)]
pub struct JsonFileHistory {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
}

impl JsonFileHistory {
    /// Open the history at `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        debug!("Loaded {} history entries from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl MessageHistory for JsonFileHistory {
    fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let mut entries = self.lock();
        entries.push(entry);
        self.persist(&entries)
    }

    fn update_status(&self, id: &CorrelationId, status: MessageStatus) -> Result<bool, HistoryError> {
        let mut entries = self.lock();
        if !update_newest(&mut entries, id, status) {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> CorrelationId {
        CorrelationId::parse(raw).unwrap()
    }

    #[test]
    fn test_in_memory_history_updates_newest() {
        let history = InMemoryHistory::new();
        let key = id("A3F7E2C1");
        history
            .record(HistoryEntry::new(
                Some(key.clone()),
                MessageDirection::Inbound,
                "+4670",
                "first",
                MessageStatus::Sent,
            ))
            .unwrap();
        history
            .record(HistoryEntry::new(
                Some(key.clone()),
                MessageDirection::Inbound,
                "+4670",
                "second",
                MessageStatus::Pending,
            ))
            .unwrap();

        assert!(history.update_status(&key, MessageStatus::Failed).unwrap());
        let entries = history.entries();
        assert_eq!(entries[0].status, MessageStatus::Sent);
        assert_eq!(entries[1].status, MessageStatus::Failed);
        assert_eq!(history.find(&key).unwrap().text, "second");
        assert!(!history.update_status(&id("00000000"), MessageStatus::Sent).unwrap());
    }

    #[test]
    fn test_final_status_is_not_downgraded() {
        let history = InMemoryHistory::new();
        let key = id("A3F7E2C1");
        history
            .record(HistoryEntry::new(
                Some(key.clone()),
                MessageDirection::Outbound,
                "+4670",
                "Hi",
                MessageStatus::Pending,
            ))
            .unwrap();

        history.update_status(&key, MessageStatus::Delivered).unwrap();
        assert!(history.update_status(&key, MessageStatus::Sent).unwrap());
        assert_eq!(history.find(&key).unwrap().status, MessageStatus::Delivered);

        history.update_status(&key, MessageStatus::Failed).unwrap();
        assert_eq!(history.find(&key).unwrap().status, MessageStatus::Failed);
    }

    #[test]
    fn test_json_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("messages.json");
        let key = id("A3F7E2C1");

        {
            let history = JsonFileHistory::open(&path).unwrap();
            history
                .record(HistoryEntry::new(
                    Some(key.clone()),
                    MessageDirection::Outbound,
                    "+46701234567",
                    "Hej",
                    MessageStatus::Pending,
                ))
                .unwrap();
            history.update_status(&key, MessageStatus::Delivered).unwrap();
        }

        let reopened = JsonFileHistory::open(&path).unwrap();
        let entry = reopened.find(&key).unwrap();
        assert_eq!(entry.status, MessageStatus::Delivered);
        assert_eq!(entry.direction, MessageDirection::Outbound);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"delivered\""));
        assert!(raw.contains("\"correlation_id\": \"A3F7E2C1\""));
    }

    #[test]
    fn test_json_history_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileHistory::open(&path),
            Err(HistoryError::Serialization(_))
        ));
    }
}
