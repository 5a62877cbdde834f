//! Object-exchange session state machine
//!
//! A session wraps one transport stream for one CONNECT / PUT / DISCONNECT
//! cycle:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Transferring -> Connected
//!                                                 -> Disconnecting -> Idle
//! ```
//!
//! `Error` is reachable from every state after `Idle`; a session in `Error` is
//! discarded and the caller opens a fresh one.

use std::sync::{Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::errors::{ConnectError, ObexError, SessionError};
use crate::protocol::obex::{
    self, header_id, Header, HeaderValue, Opcode, Packet, ResponseCode, MIN_PACKET_LEN, PACKET_PREFIX_LEN,
    VCARD_MIME_TYPE,
};
use crate::transport::BoxedStream;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Transferring,
    Disconnecting,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Transferring => "Transferring",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Error => "Error",
        }
    }
}

/// Peer verdict on a pushed object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushResult {
    Accepted,
    Rejected(ResponseCode),
}

impl PushResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushResult::Accepted)
    }
}

/// Object name used when pushing a record
pub fn object_name(id: &str) -> String {
    format!("message_{id}.vcf")
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

/// Client side of one object-exchange session
pub struct ObexSession {
    state: Mutex<SessionState>,
    stream: tokio::sync::Mutex<BoxedStream>,
    config: SessionConfig,
    /// Negotiated maximum packet length
    packet_len: u16,
    connection_id: Option<u32>,
}

impl std::fmt::Debug for ObexSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObexSession")
            .field("state", &self.state())
            .field("packet_len", &self.packet_len)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl ObexSession {
    /// Run the CONNECT handshake over `stream`
    pub async fn open(stream: BoxedStream, config: &SessionConfig) -> Result<Self, ConnectError> {
        let mut session = Self {
            state: Mutex::new(SessionState::Idle),
            stream: tokio::sync::Mutex::new(stream),
            config: config.clone(),
            packet_len: config.max_packet_len.max(MIN_PACKET_LEN),
            connection_id: None,
        };
        session.set_state(SessionState::Connecting);

        let timeout = config.handshake_timeout();
        match tokio::time::timeout(timeout, session.handshake()).await {
            Ok(Ok(())) => {
                session.set_state(SessionState::Connected);
                debug!(
                    "OBEX session connected (packet length {}, connection id {:?})",
                    session.packet_len, session.connection_id
                );
                Ok(session)
            }
            Ok(Err(err)) => {
                session.set_state(SessionState::Error);
                Err(err)
            }
            Err(_) => {
                session.set_state(SessionState::Error);
                Err(ConnectError::Timeout {
                    duration_ms: config.handshake_timeout_ms,
                })
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), ConnectError> {
        let stream = self.stream.get_mut();
        obex::write_packet::<_, ConnectError>(stream, &Packet::connect(self.packet_len)).await?;

        let bytes = obex::read_packet::<_, ConnectError>(stream, self.packet_len).await?;
        let code = ResponseCode::from_byte(bytes[0]);
        if !code.is_success() {
            return Err(ConnectError::HandshakeRejected { code });
        }

        let response = Packet::decode(&bytes, true)?;
        if let Some(params) = response.connect {
            let peer_len = params.max_packet_len.max(MIN_PACKET_LEN);
            self.packet_len = self.packet_len.min(peer_len);
        }
        self.connection_id = match response.header(header_id::CONNECTION_ID).map(|h| &h.value) {
            Some(HeaderValue::U32(id)) => Some(*id),
            _ => None,
        };
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Negotiated maximum packet length
    pub fn packet_len(&self) -> u16 {
        self.packet_len
    }

    /// Push one object and wait for the peer's verdict
    ///
    /// Only one push may be outstanding; a second concurrent call fails with
    /// `SessionError::PushInFlight` and leaves the first untouched.
    pub async fn push(&self, name: &str, payload: &[u8]) -> Result<PushResult, SessionError> {
        let mut stream = self.stream.try_lock().map_err(|_| SessionError::PushInFlight)?;

        let state = self.state();
        if state != SessionState::Connected {
            return Err(SessionError::InvalidState { state: state.as_str() });
        }

        let packets = self.put_packets(name, payload)?;
        self.set_state(SessionState::Transferring);

        match self.transfer(&mut stream, &packets).await {
            Ok(result) => {
                self.set_state(SessionState::Connected);
                debug!("Pushed {} ({} bytes, {} packets): {:?}", name, payload.len(), packets.len(), result);
                Ok(result)
            }
            Err(err) => {
                self.set_state(SessionState::Error);
                Err(err)
            }
        }
    }

    async fn transfer(&self, stream: &mut BoxedStream, packets: &[Packet]) -> Result<PushResult, SessionError> {
        let last = packets.len().saturating_sub(1);
        for (index, packet) in packets.iter().enumerate() {
            obex::write_packet::<_, SessionError>(stream, packet).await?;
            let code = self.read_response(stream).await?.response_code();

            match code {
                ResponseCode::Continue if index < last => continue,
                ResponseCode::Success if index == last => return Ok(PushResult::Accepted),
                ResponseCode::Success | ResponseCode::Continue => {
                    return Err(ObexError::UnexpectedOpcode { opcode: code.as_byte() }.into());
                }
                other => return Ok(PushResult::Rejected(other)),
            }
        }
        Err(ObexError::TooShort {
            expected: PACKET_PREFIX_LEN,
            actual: 0,
        }
        .into())
    }

    async fn read_response(&self, stream: &mut BoxedStream) -> Result<Packet, SessionError> {
        let read = obex::read_packet::<_, SessionError>(stream, self.packet_len.max(self.config.max_packet_len));
        let bytes = tokio::time::timeout(self.config.ack_timeout(), read)
            .await
            .map_err(|_| SessionError::AckTimeout {
                duration_ms: self.config.ack_timeout_ms,
            })??;
        Ok(Packet::decode(&bytes, false)?)
    }

    /// Split an object into PUT packets that fit the negotiated length
    fn put_packets(&self, name: &str, payload: &[u8]) -> Result<Vec<Packet>, ObexError> {
        let max = self.packet_len as usize;
        let total = u32::try_from(payload.len()).map_err(|_| ObexError::TooLarge {
            length: payload.len(),
            max: u32::MAX as usize,
        })?;

        let mut packets = Vec::new();
        let mut remaining = payload;
        let mut first = true;
        loop {
            let mut headers = Vec::new();
            if let Some(id) = self.connection_id {
                headers.push(Header::connection_id(id));
            }
            if first {
                headers.push(Header::name(name));
                headers.push(Header::mime_type(VCARD_MIME_TYPE));
                headers.push(Header::length(total));
            }

            // Body header prefix is three bytes
            let overhead = PACKET_PREFIX_LEN + headers.iter().map(Header::encoded_len).sum::<usize>() + 3;
            if overhead >= max {
                return Err(ObexError::TooLarge { length: overhead, max });
            }

            let (chunk, rest) = remaining.split_at(remaining.len().min(max - overhead));
            let is_last = rest.is_empty();
            let (opcode, body) = if is_last {
                (Opcode::PutFinal, Header::end_of_body(chunk))
            } else {
                (Opcode::Put, Header::body(chunk))
            };
            headers.push(body);
            packets.push(Packet {
                code: opcode.as_byte(),
                connect: None,
                headers,
            });

            if is_last {
                return Ok(packets);
            }
            remaining = rest;
            first = false;
        }
    }

    /// Disconnect and release the stream
    ///
    /// Best effort: failures are logged and otherwise ignored.
    pub async fn close(self) {
        self.set_state(SessionState::Disconnecting);
        let mut packet = Packet::request(Opcode::Disconnect);
        if let Some(id) = self.connection_id {
            packet = packet.with_header(Header::connection_id(id));
        }

        let ack_timeout = self.config.ack_timeout();
        let max_len = self.packet_len.max(self.config.max_packet_len);
        let mut stream = self.stream.into_inner();

        let exchange = async {
            obex::write_packet::<_, SessionError>(&mut stream, &packet).await?;
            obex::read_packet::<_, SessionError>(&mut stream, max_len).await
        };
        match tokio::time::timeout(ack_timeout, exchange).await {
            Ok(Ok(bytes)) => debug!("Disconnected: {}", ResponseCode::from_byte(bytes[0])),
            Ok(Err(err)) => warn!("Disconnect failed: {}", err),
            Err(_) => warn!("Disconnect was not acknowledged within {:?}", ack_timeout),
        }

        if let Err(err) = stream.shutdown().await {
            debug!("Stream shutdown failed: {}", err);
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = SessionState::Idle;
    }
}
