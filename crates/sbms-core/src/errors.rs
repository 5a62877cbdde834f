//! Error types for the SBMS relay protocol
//!
//! Each concern gets its own error enum so callers can match on exactly the
//! failures an operation can produce. `SbmsError` unifies them for callers that
//! only need to propagate.

use crate::protocol::obex::ResponseCode;

// ----------------------------------------------------------------------------
// Codec Errors
// ----------------------------------------------------------------------------

/// Framing failure while decoding a tagged record
///
/// Only framing problems are errors. A well-framed record that lacks the tags
/// of any known kind decodes as `RecordKind::Unknown` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed record: {reason}")]
    Malformed { reason: &'static str },
}

impl DecodeError {
    pub(crate) fn malformed(reason: &'static str) -> Self {
        DecodeError::Malformed { reason }
    }
}

// ----------------------------------------------------------------------------
// Validation Errors
// ----------------------------------------------------------------------------

/// Content of a request that cannot be relayed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid address: {address:?}")]
    InvalidAddress { address: String },
    #[error("Invalid text length: {length} characters (allowed 1..={max})")]
    InvalidLength { length: usize, max: usize },
    #[error("Invalid correlation id: {id:?}")]
    InvalidId { id: String },
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failure of the underlying duplex byte stream
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open transport {target}: {source}")]
    OpenFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport is not available: {reason}")]
    Unavailable { reason: String },
}

// ----------------------------------------------------------------------------
// OBEX Packet Errors
// ----------------------------------------------------------------------------

/// Malformed or oversized OBEX packet
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObexError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Packet length field {declared} does not match {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("Packet of {length} bytes exceeds the maximum of {max}")]
    TooLarge { length: usize, max: usize },
    #[error("Truncated header 0x{header_id:02X}")]
    TruncatedHeader { header_id: u8 },
    #[error("Invalid unicode in header 0x{header_id:02X}")]
    InvalidUnicode { header_id: u8 },
    #[error("Unexpected opcode 0x{opcode:02X}")]
    UnexpectedOpcode { opcode: u8 },
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Failure to establish an object-exchange session
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Handshake rejected by peer with response {code}")]
    HandshakeRejected { code: ResponseCode },
    #[error("Handshake timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
    #[error("Handshake failed: {0}")]
    Protocol(#[from] ObexError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<std::io::Error> for ConnectError {
    fn from(err: std::io::Error) -> Self {
        ConnectError::Transport(TransportError::Io(err))
    }
}

/// Failure of an established session
///
/// `PushInFlight` is a programming error: the caller issued a second push while
/// the first one was still waiting for its acknowledgment.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A push is already in flight on this session")]
    PushInFlight,
    #[error("Session is not usable in state {state}")]
    InvalidState { state: &'static str },
    #[error("Peer acknowledgment timed out after {duration_ms}ms")]
    AckTimeout { duration_ms: u64 },
    #[error("Session protocol error: {0}")]
    Protocol(#[from] ObexError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Transport(TransportError::Io(err))
    }
}

// ----------------------------------------------------------------------------
// Correlation Errors
// ----------------------------------------------------------------------------

/// Failure of a correlation tracker operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// An unresolved correlation already uses this id. Indicates a bucketing
    /// or clock-skew bug on the sending side.
    #[error("Duplicate correlation id {id}")]
    DuplicateId { id: String },
    /// No correlation with this id is being tracked. Expected when a peer
    /// rebroadcasts statuses after a restart.
    #[error("No such correlation: {id}")]
    NoSuchCorrelation { id: String },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Umbrella error for the SBMS core
#[derive(Debug, thiserror::Error)]
pub enum SbmsError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = core::result::Result<T, SbmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DecodeError::malformed("missing END:VCARD");
        assert_eq!(err.to_string(), "Malformed record: missing END:VCARD");

        let err = TrackerError::DuplicateId {
            id: "A3F7E2C1".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate correlation id A3F7E2C1");
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: SbmsError = ValidationError::InvalidLength { length: 0, max: 160 }.into();
        assert!(matches!(err, SbmsError::Validation(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: SessionError = io.into();
        assert!(matches!(err, SessionError::Transport(TransportError::Io(_))));
    }
}
