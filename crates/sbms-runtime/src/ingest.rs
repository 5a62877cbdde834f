//! Ingestion adapters and the ingestion loop
//!
//! Units are processed strictly one at a time: the next unit is not requested
//! until the previous one has been handled and acknowledged.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sbms_core::TimeSource;

use crate::collaborators::{InboundUnit, IngestionSource};
use crate::errors::IngestError;
use crate::orchestrator::{InboundOutcome, RelayOrchestrator};

// ----------------------------------------------------------------------------
// Ingestion Loop
// ----------------------------------------------------------------------------

/// Feed every unit from `source` to the orchestrator until the source ends
///
/// Returns the number of units processed.
pub async fn run_ingestion<S, T>(source: &mut S, orchestrator: &RelayOrchestrator<T>) -> usize
where
    S: IngestionSource + ?Sized,
    T: TimeSource,
{
    let mut processed = 0;
    while let Some(unit) = source.next_unit().await {
        let outcome = orchestrator.on_inbound_bytes(&unit.bytes).await;
        match &outcome {
            InboundOutcome::Malformed | InboundOutcome::Ignored => {
                debug!("Unit from {}: {:?}", unit.origin, outcome)
            }
            _ => info!("Unit from {}: {:?}", unit.origin, outcome),
        }

        if let Err(err) = source.acknowledge(&unit).await {
            warn!("Failed to acknowledge unit from {}: {}", unit.origin, err);
        }
        processed += 1;
    }
    debug!("Ingestion source exhausted after {} units", processed);
    processed
}

// ----------------------------------------------------------------------------
// Channel Inbox
// ----------------------------------------------------------------------------

/// Producer half of a `ChannelInbox`
pub type InboxSender = mpsc::UnboundedSender<InboundUnit>;

/// Ingestion source fed through a channel, e.g. by an OBEX listener
#[derive(Debug)]
pub struct ChannelInbox {
    rx: mpsc::UnboundedReceiver<InboundUnit>,
}

impl ChannelInbox {
    pub fn new() -> (InboxSender, ChannelInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ChannelInbox { rx })
    }
}

#[async_trait]
impl IngestionSource for ChannelInbox {
    async fn next_unit(&mut self) -> Option<InboundUnit> {
        self.rx.recv().await
    }

    async fn acknowledge(&mut self, _unit: &InboundUnit) -> Result<(), IngestError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Merged Source
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

/// Interleaves two sources into one serial stream of units
///
/// Whichever source has a unit ready first wins. Each acknowledgment goes back
/// to the source the unit came from. Ends once both sources have ended.
#[derive(Debug)]
pub struct MergedSource<A, B> {
    first: A,
    second: B,
    first_done: bool,
    second_done: bool,
    last: Option<Side>,
}

impl<A, B> MergedSource<A, B>
where
    A: IngestionSource,
    B: IngestionSource,
{
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            first_done: false,
            second_done: false,
            last: None,
        }
    }
}

#[async_trait]
impl<A, B> IngestionSource for MergedSource<A, B>
where
    A: IngestionSource,
    B: IngestionSource,
{
    async fn next_unit(&mut self) -> Option<InboundUnit> {
        while !(self.first_done && self.second_done) {
            let (side, unit) = tokio::select! {
                unit = self.first.next_unit(), if !self.first_done => (Side::First, unit),
                unit = self.second.next_unit(), if !self.second_done => (Side::Second, unit),
            };
            match (side, unit) {
                (side, Some(unit)) => {
                    self.last = Some(side);
                    return Some(unit);
                }
                (Side::First, None) => self.first_done = true,
                (Side::Second, None) => self.second_done = true,
            }
        }
        None
    }

    async fn acknowledge(&mut self, unit: &InboundUnit) -> Result<(), IngestError> {
        match self.last.take() {
            Some(Side::First) => self.first.acknowledge(unit).await,
            Some(Side::Second) => self.second.acknowledge(unit).await,
            None => Ok(()),
        }
    }
}

// ----------------------------------------------------------------------------
// Directory Inbox
// ----------------------------------------------------------------------------

/// Default polling interval of a watching `DirectoryInbox`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ingestion source reading pushed objects from a folder
///
/// Picks up `message_*.vcf` and `message_*.vcd` files in name order and
/// deletes each one once it is acknowledged. Files modified more recently than
/// the settle time may still be written by the receiving stack and are left
/// for a later scan.
#[derive(Debug)]
pub struct DirectoryInbox {
    dir: PathBuf,
    /// Keep polling when the folder is empty instead of ending
    watch: bool,
    poll_interval: Duration,
    settle_time: Duration,
    queue: VecDeque<PathBuf>,
    /// Acknowledged files that could not be removed
    stuck: HashSet<PathBuf>,
}

impl DirectoryInbox {
    /// Inbox that keeps polling `dir`, settling files for one poll interval
    pub fn watch(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            watch: true,
            poll_interval,
            settle_time: poll_interval,
            queue: VecDeque::new(),
            stuck: HashSet::new(),
        }
    }

    /// Inbox that ends once `dir` holds no more messages
    ///
    /// Files are taken regardless of age unless a settle time is set.
    pub fn drain(dir: impl Into<PathBuf>) -> Self {
        Self {
            watch: false,
            settle_time: Duration::ZERO,
            ..Self::watch(dir, DEFAULT_POLL_INTERVAL)
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn scan(&mut self) {
        let mut found = Vec::new();
        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut entries) => loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let path = entry.path();
                        if !is_message_file(&path) || self.stuck.contains(&path) {
                            continue;
                        }
                        if self.is_settling(&entry).await {
                            debug!("{} is still being written", path.display());
                            continue;
                        }
                        found.push(path);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!("Failed to list {}: {}", self.dir.display(), err);
                        break;
                    }
                }
            },
            Err(err) => warn!("Failed to open inbox {}: {}", self.dir.display(), err),
        }
        found.sort();
        self.queue.extend(found);
    }
}

impl DirectoryInbox {
    async fn is_settling(&self, entry: &tokio::fs::DirEntry) -> bool {
        if self.settle_time.is_zero() {
            return false;
        }
        let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                debug!("No modification time for {}: {}", entry.path().display(), err);
                return false;
            }
        };
        // A timestamp in the future counts as settled
        modified
            .elapsed()
            .map(|age| age < self.settle_time)
            .unwrap_or(false)
    }
}

fn is_message_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let lower = name.to_ascii_lowercase();
    lower.starts_with("message_") && (lower.ends_with(".vcf") || lower.ends_with(".vcd"))
}

#[async_trait]
impl IngestionSource for DirectoryInbox {
    async fn next_unit(&mut self) -> Option<InboundUnit> {
        loop {
            while let Some(path) = self.queue.pop_front() {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => return Some(InboundUnit::new(path.display().to_string(), bytes)),
                    // Vanished between scan and read
                    Err(err) => debug!("Skipping {}: {}", path.display(), err),
                }
            }

            self.scan().await;
            if !self.queue.is_empty() {
                continue;
            }
            if !self.watch {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn acknowledge(&mut self, unit: &InboundUnit) -> Result<(), IngestError> {
        let path = PathBuf::from(&unit.origin);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => {
                self.stuck.insert(path);
                Err(IngestError::Remove {
                    path: unit.origin.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_file_filter() {
        assert!(is_message_file(Path::new("/in/message_A3F7E2C1.vcf")));
        assert!(is_message_file(Path::new("/in/MESSAGE_1.VCD")));
        assert!(!is_message_file(Path::new("/in/contact.vcf")));
        assert!(!is_message_file(Path::new("/in/message_1.txt")));
    }

    #[tokio::test]
    async fn test_directory_inbox_drains_in_order_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("message_B.vcf"), b"second").unwrap();
        std::fs::write(dir.path().join("message_A.vcd"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut inbox = DirectoryInbox::drain(dir.path());
        let first = inbox.next_unit().await.unwrap();
        assert_eq!(first.bytes, b"first");
        inbox.acknowledge(&first).await.unwrap();
        assert!(!dir.path().join("message_A.vcd").exists());

        let second = inbox.next_unit().await.unwrap();
        assert_eq!(second.bytes, b"second");
        inbox.acknowledge(&second).await.unwrap();

        assert!(inbox.next_unit().await.is_none());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_recently_written_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("message_B.vcf");
        let old = dir.path().join("message_A.vcf");
        std::fs::write(&fresh, b"partial").unwrap();
        std::fs::write(&old, b"complete").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let mut inbox = DirectoryInbox::drain(dir.path()).with_settle_time(Duration::from_secs(60));
        let unit = inbox.next_unit().await.unwrap();
        assert_eq!(unit.bytes, b"complete");
        inbox.acknowledge(&unit).await.unwrap();

        assert!(inbox.next_unit().await.is_none());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_merged_source_acknowledges_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("message_A.vcf"), b"from folder").unwrap();
        let (tx, channel) = ChannelInbox::new();
        tx.send(InboundUnit::new("peer", b"from peer".to_vec())).unwrap();
        drop(tx);

        let mut merged = MergedSource::new(channel, DirectoryInbox::drain(dir.path()));
        let mut seen = Vec::new();
        while let Some(unit) = merged.next_unit().await {
            merged.acknowledge(&unit).await.unwrap();
            seen.push(unit.bytes);
        }

        seen.sort();
        assert_eq!(seen, vec![b"from folder".to_vec(), b"from peer".to_vec()]);
        assert!(!dir.path().join("message_A.vcf").exists());
    }

    #[tokio::test]
    async fn test_channel_inbox_ends_when_senders_drop() {
        let (tx, mut inbox) = ChannelInbox::new();
        tx.send(InboundUnit::new("peer", b"bytes".to_vec())).unwrap();
        drop(tx);

        let unit = inbox.next_unit().await.unwrap();
        assert_eq!(unit.origin, "peer");
        inbox.acknowledge(&unit).await.unwrap();
        assert!(inbox.next_unit().await.is_none());
    }
}
