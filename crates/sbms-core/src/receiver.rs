//! Server side of an object-exchange session
//!
//! Answers CONNECT, reassembles PUT bodies and hands every completed object to
//! a sink whose verdict becomes the final PUT response. The relay's inbound
//! link runs on this, and so does the peer in session tests.

use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{SessionError, TransportError};
use crate::protocol::obex::{self, Opcode, Packet, ResponseCode, MIN_PACKET_LEN};
use crate::transport::BoxedStream;

/// Largest object the receiver will reassemble
pub const DEFAULT_MAX_OBJECT_LEN: usize = 64 * 1024;

/// A fully received object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedObject {
    pub name: Option<String>,
    pub body: Vec<u8>,
}

type Sink = dyn Fn(ReceivedObject) -> ResponseCode + Send + Sync;

/// Serves OBEX PUT requests on incoming streams
#[derive(Clone)]
pub struct ObexReceiver {
    max_packet_len: u16,
    max_object_len: usize,
    sink: Arc<Sink>,
}

impl std::fmt::Debug for ObexReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObexReceiver")
            .field("max_packet_len", &self.max_packet_len)
            .field("max_object_len", &self.max_object_len)
            .finish_non_exhaustive()
    }
}

impl ObexReceiver {
    pub fn new<F>(max_packet_len: u16, sink: F) -> Self
    where
        F: Fn(ReceivedObject) -> ResponseCode + Send + Sync + 'static,
    {
        Self {
            max_packet_len: max_packet_len.max(MIN_PACKET_LEN),
            max_object_len: DEFAULT_MAX_OBJECT_LEN,
            sink: Arc::new(sink),
        }
    }

    pub fn with_max_object_len(mut self, max_object_len: usize) -> Self {
        self.max_object_len = max_object_len;
        self
    }

    /// Serve one stream until the peer disconnects or hangs up
    pub async fn serve(&self, mut stream: BoxedStream) -> Result<(), SessionError> {
        let mut pending = Pending::default();

        loop {
            let bytes = match obex::read_packet::<_, SessionError>(&mut stream, self.max_packet_len).await {
                Ok(bytes) => bytes,
                Err(SessionError::Transport(TransportError::Io(err))) if err.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Peer closed the stream");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            let packet = match Packet::decode_request(&bytes) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!("Dropping malformed OBEX request: {}", err);
                    pending = Pending::default();
                    self.respond(&mut stream, ResponseCode::BadRequest).await?;
                    continue;
                }
            };

            match packet.opcode() {
                Some(Opcode::Connect) => {
                    debug!("OBEX CONNECT");
                    let response = Packet::connect_response(ResponseCode::Success, self.max_packet_len);
                    obex::write_packet::<_, SessionError>(&mut stream, &response).await?;
                }
                Some(opcode @ (Opcode::Put | Opcode::PutFinal)) => {
                    let code = self.on_put(&mut pending, &packet, opcode == Opcode::PutFinal);
                    self.respond(&mut stream, code).await?;
                }
                Some(Opcode::Abort) => {
                    debug!("OBEX ABORT");
                    pending = Pending::default();
                    self.respond(&mut stream, ResponseCode::Success).await?;
                }
                Some(Opcode::Disconnect) => {
                    debug!("OBEX DISCONNECT");
                    self.respond(&mut stream, ResponseCode::Success).await?;
                    return Ok(());
                }
                None => {
                    warn!("Unsupported OBEX opcode 0x{:02X}", packet.code);
                    self.respond(&mut stream, ResponseCode::BadRequest).await?;
                }
            }
        }
    }

    fn on_put(&self, pending: &mut Pending, packet: &Packet, is_final: bool) -> ResponseCode {
        if pending.name.is_none() {
            pending.name = packet.name().map(str::to_string);
        }
        if !pending.oversized {
            pending.body.extend_from_slice(&packet.body_chunk());
            if pending.body.len() > self.max_object_len {
                warn!("Object exceeds {} bytes, refusing", self.max_object_len);
                pending.oversized = true;
                pending.body.clear();
            }
        }

        if !is_final {
            return ResponseCode::Continue;
        }

        let finished = std::mem::take(pending);
        if finished.oversized {
            return ResponseCode::EntityTooLarge;
        }
        let object = ReceivedObject {
            name: finished.name,
            body: finished.body,
        };
        debug!("Received object {:?} ({} bytes)", object.name, object.body.len());
        (self.sink)(object)
    }

    async fn respond(&self, stream: &mut BoxedStream, code: ResponseCode) -> Result<(), SessionError> {
        obex::write_packet::<_, SessionError>(stream, &Packet::response(code)).await
    }
}

#[derive(Debug, Default)]
struct Pending {
    name: Option<String>,
    body: Vec<u8>,
    oversized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::{ObexSession, PushResult};

    #[tokio::test]
    async fn test_oversized_object_is_refused() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let receiver = ObexReceiver::new(4096, |_| ResponseCode::Success).with_max_object_len(100);
        tokio::spawn(async move { receiver.serve(Box::new(server)).await });

        let session = ObexSession::open(Box::new(client), &SessionConfig::testing())
            .await
            .unwrap();
        let result = session.push("big.vcf", &[b'x'; 500]).await.unwrap();
        assert_eq!(result, PushResult::Rejected(ResponseCode::EntityTooLarge));

        // Session stays usable for the next object
        let result = session.push("small.vcf", b"ok").await.unwrap();
        assert_eq!(result, PushResult::Accepted);
    }

    #[tokio::test]
    async fn test_peer_hangup_ends_serve() {
        let (client, server) = tokio::io::duplex(1024);
        let receiver = ObexReceiver::new(1024, |_| ResponseCode::Success);
        let task = tokio::spawn(async move { receiver.serve(Box::new(server)).await });
        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_opcode_gets_bad_request() {
        let (mut client, server) = tokio::io::duplex(1024);
        let receiver = ObexReceiver::new(1024, |_| ResponseCode::Success);
        tokio::spawn(async move { receiver.serve(Box::new(server)).await });

        let packet = Packet {
            code: 0x03,
            connect: None,
            headers: Vec::new(),
        };
        obex::write_packet::<_, SessionError>(&mut client, &packet).await.unwrap();
        let bytes = obex::read_packet::<_, SessionError>(&mut client, 1024).await.unwrap();
        assert_eq!(ResponseCode::from_byte(bytes[0]), ResponseCode::BadRequest);
    }
}
