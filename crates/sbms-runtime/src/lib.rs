//! SBMS Runtime
//!
//! Drives the relay on top of `sbms-core`:
//! - `RelayOrchestrator`: routes inbound records, calls the send primitive and
//!   pushes statuses back
//! - ingestion adapters (`DirectoryInbox`, `ChannelInbox`) and `run_ingestion`
//! - the periodic correlation sweeper
//! - message history backends

pub mod collaborators;
pub mod dedup;
pub mod errors;
pub mod history;
pub mod ingest;
pub mod orchestrator;
pub mod sweeper;

pub use collaborators::{InboundUnit, IngestionSource, SendPrimitive};
pub use errors::{HistoryError, IngestError, RuntimeError};
pub use history::{HistoryEntry, InMemoryHistory, JsonFileHistory, MessageDirection, MessageHistory, MessageStatus};
pub use ingest::{run_ingestion, ChannelInbox, DirectoryInbox, InboxSender, MergedSource};
pub use orchestrator::{InboundOutcome, RelayOrchestrator, RelayStats};
pub use sweeper::spawn_sweeper;

// Re-export core types for convenience
pub use sbms_core::{CorrelationId, SbmsConfig, SendOutcome, StatusCode, TimeSource};
