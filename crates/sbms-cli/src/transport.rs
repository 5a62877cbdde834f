//! OBEX over TCP
//!
//! `TcpTransport` dials the peer for every outgoing session. `spawn_listener`
//! accepts incoming sessions and serves each one with an `ObexReceiver` whose
//! objects are forwarded into a `ChannelInbox`.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sbms_core::{BoxedStream, ObexReceiver, ReceivedObject, ResponseCode, TransportAdapter, TransportError, TransportType};
use sbms_runtime::{InboundUnit, InboxSender};

// ----------------------------------------------------------------------------
// Outgoing Sessions
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TcpTransport {
    peer: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(peer: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            peer: peer.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl TransportAdapter for TcpTransport {
    async fn open(&self) -> Result<BoxedStream, TransportError> {
        let connect = TcpStream::connect(self.peer.as_str());
        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::OpenFailed {
                    target: self.peer.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(TransportError::OpenFailed {
                    target: self.peer.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", self.peer, err);
        }
        Ok(Box::new(stream))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

// ----------------------------------------------------------------------------
// Incoming Sessions
// ----------------------------------------------------------------------------

/// Receiver sink that queues every object for the orchestrator
///
/// Objects are accepted as soon as they are queued; validation happens later
/// and is answered with a status record.
pub fn inbox_sink(inbox: InboxSender) -> impl Fn(ReceivedObject) -> ResponseCode + Send + Sync + 'static {
    move |object: ReceivedObject| {
        let origin = object.name.unwrap_or_else(|| "obex".to_string());
        debug!("Received object {} ({} bytes)", origin, object.body.len());
        match inbox.send(InboundUnit::new(origin, object.body)) {
            Ok(()) => ResponseCode::Success,
            Err(_) => {
                warn!("Inbox closed, refusing object");
                ResponseCode::ServiceUnavailable
            }
        }
    }
}

/// Bind `addr` and serve every accepted connection with `receiver`
///
/// Returns the bound address, which differs from `addr` when it asked for
/// port 0.
pub async fn spawn_listener(addr: &str, receiver: ObexReceiver) -> io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("OBEX listener on tcp://{}", local);

    let handle = tokio::spawn(async move {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("Accept failed: {}", err);
                    continue;
                }
            };
            debug!("Session from {}", remote);

            let receiver = receiver.clone();
            tokio::spawn(async move {
                if let Err(err) = receiver.serve(Box::new(stream)).await {
                    warn!("Session from {} ended with error: {}", remote, err);
                }
            });
        }
    });
    Ok((local, handle))
}
