//! Collaborator seams of the relay
//!
//! The orchestrator never talks to a modem, a folder or a socket directly. It
//! is handed implementations of these traits instead.

use async_trait::async_trait;
use sbms_core::SendOutcome;

use crate::errors::IngestError;

// ----------------------------------------------------------------------------
// Send Primitive
// ----------------------------------------------------------------------------

/// Hands a message to the cellular network
///
/// Implementations report failures through `SendOutcome::Failed`; the
/// orchestrator wraps every call in its own timeout.
#[async_trait]
pub trait SendPrimitive: Send + Sync {
    async fn send(&self, address: &str, text: &str) -> SendOutcome;
}

// ----------------------------------------------------------------------------
// Ingestion Source
// ----------------------------------------------------------------------------

/// One raw inbound buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundUnit {
    /// Where the bytes came from (file path, peer address)
    pub origin: String,
    pub bytes: Vec<u8>,
}

impl InboundUnit {
    pub fn new(origin: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            origin: origin.into(),
            bytes,
        }
    }
}

/// Push-style producer of inbound buffers
#[async_trait]
pub trait IngestionSource: Send {
    /// Wait for the next unit; `None` once the source is exhausted
    async fn next_unit(&mut self) -> Option<InboundUnit>;

    /// Called after the unit was fully processed
    async fn acknowledge(&mut self, unit: &InboundUnit) -> Result<(), IngestError>;
}
