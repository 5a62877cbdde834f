//! Transport abstraction for the relay
//!
//! The session layer only needs an ordered, reliable duplex byte stream. A
//! `TransportAdapter` knows how to reach the peer (RFCOMM channel, TCP socket,
//! in-process pipe) and hands out one fresh stream per session.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::errors::TransportError;

// ----------------------------------------------------------------------------
// Stream Types
// ----------------------------------------------------------------------------

/// Byte stream a session runs over
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, type-erased stream
pub type BoxedStream = Box<dyn DuplexStream>;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransportType {
    /// Bluetooth RFCOMM
    Bluetooth,
    /// OBEX over TCP
    Tcp,
    /// In-process pipe (for testing)
    Local,
}

// ----------------------------------------------------------------------------
// Transport Adapter Trait
// ----------------------------------------------------------------------------

/// Opens streams to a single peer
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Open a new stream to the peer
    async fn open(&self) -> Result<BoxedStream, TransportError>;

    /// Transport kind, for logging
    fn transport_type(&self) -> TransportType;

    /// Human readable peer description, for logging
    fn describe(&self) -> String;
}

// ----------------------------------------------------------------------------
// In-Process Transport
// ----------------------------------------------------------------------------

/// Size of the in-memory pipe buffer
const LOCAL_PIPE_CAPACITY: usize = 64 * 1024;

/// Transport whose streams are in-memory pipes
///
/// Each `open` creates a pipe, keeps one end and delivers the other end to the
/// paired `LocalAcceptor`, which plays the peer.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    accept_tx: mpsc::UnboundedSender<BoxedStream>,
}

/// Peer side of a `LocalTransport`
pub struct LocalAcceptor {
    accept_rx: mpsc::UnboundedReceiver<BoxedStream>,
}

impl std::fmt::Debug for LocalAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAcceptor").finish_non_exhaustive()
    }
}

impl LocalTransport {
    pub fn pair() -> (LocalTransport, LocalAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (LocalTransport { accept_tx }, LocalAcceptor { accept_rx })
    }
}

#[async_trait]
impl TransportAdapter for LocalTransport {
    async fn open(&self) -> Result<BoxedStream, TransportError> {
        let (ours, theirs) = tokio::io::duplex(LOCAL_PIPE_CAPACITY);
        self.accept_tx
            .send(Box::new(theirs))
            .map_err(|_| TransportError::Unavailable {
                reason: "local acceptor dropped".to_string(),
            })?;
        Ok(Box::new(ours))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Local
    }

    fn describe(&self) -> String {
        "local pipe".to_string()
    }
}

impl LocalAcceptor {
    /// Wait for the next stream opened by the paired transport
    pub async fn accept(&mut self) -> Option<BoxedStream> {
        self.accept_rx.recv().await
    }
}
