//! SBMS Core Protocol Implementation
//!
//! Building blocks of the short-range message relay: the tagged-record codec,
//! correlation identifiers, the OBEX session state machine and receiver, and
//! the correlation tracker. Nothing in this crate spawns tasks or owns a
//! runtime; orchestration lives in `sbms-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod correlation;
pub mod errors;
pub mod protocol;
pub mod receiver;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{CorrelationConfig, IdDigest, RelayConfig, SbmsConfig, SessionConfig, ValidationConfig};
pub use correlation::{
    CorrelationState, CorrelationTracker, PendingCorrelation, SendOutcome, StatusResolution, TrackerStats,
};
pub use errors::{
    ConnectError, DecodeError, ObexError, Result, SbmsError, SessionError, TrackerError, TransportError,
    ValidationError,
};
pub use protocol::{Record, RecordKind, ResponseCode, ValidatedRequest};
pub use receiver::{ObexReceiver, ReceivedObject};
pub use session::{object_name, ObexSession, PushResult, SessionState};
pub use transport::{BoxedStream, DuplexStream, LocalAcceptor, LocalTransport, TransportAdapter, TransportType};
pub use types::{CorrelationId, MonotonicTimeSource, Priority, StatusCode, TimeSource, Timestamp};

#[cfg(any(test, feature = "testing"))]
pub use types::ManualTimeSource;
