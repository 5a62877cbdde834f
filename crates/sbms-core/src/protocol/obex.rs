//! OBEX packet layer
//!
//! Just enough of the object-exchange protocol to push a single vCard:
//! CONNECT, PUT (possibly split over several packets), DISCONNECT and ABORT.
//!
//! Every packet starts with an opcode (requests) or response code (responses)
//! followed by the big-endian length of the whole packet. CONNECT requests and
//! their responses carry four more bytes (version, flags, maximum packet
//! length) before the headers.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::ObexError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// OBEX protocol version 1.0
pub const OBEX_VERSION: u8 = 0x10;

/// Smallest maximum packet length a peer may announce
pub const MIN_PACKET_LEN: u16 = 255;

/// Opcode or response code plus the length field
pub const PACKET_PREFIX_LEN: usize = 3;

/// Version, flags and maximum packet length of CONNECT packets
pub const CONNECT_PARAMS_LEN: usize = 4;

/// MIME type announced for pushed records
pub const VCARD_MIME_TYPE: &str = "text/x-vcard";

/// Header identifiers used by the relay
pub mod header_id {
    pub const NAME: u8 = 0x01;
    pub const TYPE: u8 = 0x42;
    pub const LENGTH: u8 = 0xC3;
    pub const BODY: u8 = 0x48;
    pub const END_OF_BODY: u8 = 0x49;
    pub const CONNECTION_ID: u8 = 0xCB;
}

const FINAL_BIT: u8 = 0x80;

// ----------------------------------------------------------------------------
// Opcodes and Response Codes
// ----------------------------------------------------------------------------

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Connect,
    Disconnect,
    /// PUT with more packets to follow
    Put,
    /// Last PUT packet of an object
    PutFinal,
    Abort,
}

impl Opcode {
    pub fn as_byte(&self) -> u8 {
        match self {
            Opcode::Connect => 0x80,
            Opcode::Disconnect => 0x81,
            Opcode::Put => 0x02,
            Opcode::PutFinal => 0x82,
            Opcode::Abort => 0xFF,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x80 => Some(Opcode::Connect),
            0x81 => Some(Opcode::Disconnect),
            0x02 => Some(Opcode::Put),
            0x82 => Some(Opcode::PutFinal),
            0xFF => Some(Opcode::Abort),
            _ => None,
        }
    }
}

/// Response codes, always sent with the final bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Continue,
    Success,
    BadRequest,
    Forbidden,
    NotAcceptable,
    EntityTooLarge,
    InternalError,
    ServiceUnavailable,
    Other(u8),
}

impl ResponseCode {
    pub fn as_byte(&self) -> u8 {
        match self {
            ResponseCode::Continue => 0x90,
            ResponseCode::Success => 0xA0,
            ResponseCode::BadRequest => 0xC0,
            ResponseCode::Forbidden => 0xC3,
            ResponseCode::NotAcceptable => 0xC6,
            ResponseCode::EntityTooLarge => 0xCD,
            ResponseCode::InternalError => 0xD0,
            ResponseCode::ServiceUnavailable => 0xD3,
            ResponseCode::Other(byte) => *byte,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        // Peers disagree on the final bit for responses; compare with it set.
        match byte | FINAL_BIT {
            0x90 => ResponseCode::Continue,
            0xA0 => ResponseCode::Success,
            0xC0 => ResponseCode::BadRequest,
            0xC3 => ResponseCode::Forbidden,
            0xC6 => ResponseCode::NotAcceptable,
            0xCD => ResponseCode::EntityTooLarge,
            0xD0 => ResponseCode::InternalError,
            0xD3 => ResponseCode::ServiceUnavailable,
            _ => ResponseCode::Other(byte),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCode::Success)
    }

    fn label(&self) -> &'static str {
        match self {
            ResponseCode::Continue => "Continue",
            ResponseCode::Success => "Success",
            ResponseCode::BadRequest => "Bad Request",
            ResponseCode::Forbidden => "Forbidden",
            ResponseCode::NotAcceptable => "Not Acceptable",
            ResponseCode::EntityTooLarge => "Entity Too Large",
            ResponseCode::InternalError => "Internal Server Error",
            ResponseCode::ServiceUnavailable => "Service Unavailable",
            ResponseCode::Other(_) => "Unknown",
        }
    }
}

impl core::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:02X} ({})", self.as_byte(), self.label())
    }
}

// ----------------------------------------------------------------------------
// Headers
// ----------------------------------------------------------------------------

/// Header payload; the encoding is fixed by the top two bits of the id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Null-terminated UTF-16BE text
    Unicode(String),
    /// Length-prefixed byte sequence
    Bytes(Vec<u8>),
    /// Single byte
    Byte(u8),
    /// Four-byte big-endian quantity
    U32(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: u8,
    pub value: HeaderValue,
}

impl Header {
    pub fn name(name: &str) -> Self {
        Self {
            id: header_id::NAME,
            value: HeaderValue::Unicode(name.to_string()),
        }
    }

    /// Type header; the value is sent as null-terminated ASCII
    pub fn mime_type(mime: &str) -> Self {
        let mut bytes = mime.as_bytes().to_vec();
        bytes.push(0);
        Self {
            id: header_id::TYPE,
            value: HeaderValue::Bytes(bytes),
        }
    }

    pub fn length(length: u32) -> Self {
        Self {
            id: header_id::LENGTH,
            value: HeaderValue::U32(length),
        }
    }

    pub fn body(chunk: &[u8]) -> Self {
        Self {
            id: header_id::BODY,
            value: HeaderValue::Bytes(chunk.to_vec()),
        }
    }

    pub fn end_of_body(chunk: &[u8]) -> Self {
        Self {
            id: header_id::END_OF_BODY,
            value: HeaderValue::Bytes(chunk.to_vec()),
        }
    }

    pub fn connection_id(id: u32) -> Self {
        Self {
            id: header_id::CONNECTION_ID,
            value: HeaderValue::U32(id),
        }
    }

    /// Number of bytes this header occupies on the wire
    pub fn encoded_len(&self) -> usize {
        match &self.value {
            HeaderValue::Unicode(text) if text.is_empty() => 3,
            HeaderValue::Unicode(text) => 3 + (text.encode_utf16().count() + 1) * 2,
            HeaderValue::Bytes(bytes) => 3 + bytes.len(),
            HeaderValue::Byte(_) => 2,
            HeaderValue::U32(_) => 5,
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.id);
        match &self.value {
            HeaderValue::Unicode(text) => {
                out.extend_from_slice(&(self.encoded_len() as u16).to_be_bytes());
                if !text.is_empty() {
                    for unit in text.encode_utf16().chain(std::iter::once(0)) {
                        out.extend_from_slice(&unit.to_be_bytes());
                    }
                }
            }
            HeaderValue::Bytes(bytes) => {
                out.extend_from_slice(&(self.encoded_len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            HeaderValue::Byte(byte) => out.push(*byte),
            HeaderValue::U32(value) => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    /// Decode one header, returning it with the number of bytes consumed
    fn decode(bytes: &[u8]) -> Result<(Self, usize), ObexError> {
        let id = bytes[0];
        let truncated = ObexError::TruncatedHeader { header_id: id };
        match id >> 6 {
            0b00 | 0b01 => {
                if bytes.len() < 3 {
                    return Err(truncated);
                }
                let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
                if len < 3 || len > bytes.len() {
                    return Err(truncated);
                }
                let payload = &bytes[3..len];
                let value = if id >> 6 == 0 {
                    HeaderValue::Unicode(decode_unicode(id, payload)?)
                } else {
                    HeaderValue::Bytes(payload.to_vec())
                };
                Ok((Self { id, value }, len))
            }
            0b10 => {
                let byte = *bytes.get(1).ok_or(truncated)?;
                Ok((
                    Self {
                        id,
                        value: HeaderValue::Byte(byte),
                    },
                    2,
                ))
            }
            _ => {
                let raw = bytes.get(1..5).ok_or(truncated)?;
                let value = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
                Ok((
                    Self {
                        id,
                        value: HeaderValue::U32(value),
                    },
                    5,
                ))
            }
        }
    }
}

fn decode_unicode(header_id: u8, payload: &[u8]) -> Result<String, ObexError> {
    if payload.len() % 2 != 0 {
        return Err(ObexError::InvalidUnicode { header_id });
    }
    let mut units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|_| ObexError::InvalidUnicode { header_id })
}

// ----------------------------------------------------------------------------
// Packets
// ----------------------------------------------------------------------------

/// Extra fields of CONNECT requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub version: u8,
    pub flags: u8,
    pub max_packet_len: u16,
}

impl ConnectParams {
    pub fn new(max_packet_len: u16) -> Self {
        Self {
            version: OBEX_VERSION,
            flags: 0,
            max_packet_len,
        }
    }
}

/// A request or response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Opcode for requests, response code for responses
    pub code: u8,
    pub connect: Option<ConnectParams>,
    pub headers: Vec<Header>,
}

impl Packet {
    pub fn request(opcode: Opcode) -> Self {
        Self {
            code: opcode.as_byte(),
            connect: None,
            headers: Vec::new(),
        }
    }

    pub fn connect(max_packet_len: u16) -> Self {
        Self {
            code: Opcode::Connect.as_byte(),
            connect: Some(ConnectParams::new(max_packet_len)),
            headers: Vec::new(),
        }
    }

    pub fn response(code: ResponseCode) -> Self {
        Self {
            code: code.as_byte(),
            connect: None,
            headers: Vec::new(),
        }
    }

    pub fn connect_response(code: ResponseCode, max_packet_len: u16) -> Self {
        Self {
            code: code.as_byte(),
            connect: Some(ConnectParams::new(max_packet_len)),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_byte(self.code)
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from_byte(self.code)
    }

    pub fn header(&self, id: u8) -> Option<&Header> {
        self.headers.iter().find(|h| h.id == id)
    }

    /// Object name from the Name header, if any
    pub fn name(&self) -> Option<&str> {
        match self.header(header_id::NAME).map(|h| &h.value) {
            Some(HeaderValue::Unicode(name)) => Some(name),
            _ => None,
        }
    }

    /// Body bytes carried by this packet, Body and End-of-Body combined
    pub fn body_chunk(&self) -> Vec<u8> {
        self.headers
            .iter()
            .filter(|h| h.id == header_id::BODY || h.id == header_id::END_OF_BODY)
            .filter_map(|h| match &h.value {
                HeaderValue::Bytes(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn has_end_of_body(&self) -> bool {
        self.header(header_id::END_OF_BODY).is_some()
    }

    pub fn encoded_len(&self) -> usize {
        PACKET_PREFIX_LEN
            + self.connect.map_or(0, |_| CONNECT_PARAMS_LEN)
            + self.headers.iter().map(Header::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ObexError> {
        let length = self.encoded_len();
        if length > u16::MAX as usize {
            return Err(ObexError::TooLarge {
                length,
                max: u16::MAX as usize,
            });
        }
        let mut out = Vec::with_capacity(length);
        out.push(self.code);
        out.extend_from_slice(&(length as u16).to_be_bytes());
        if let Some(params) = self.connect {
            out.push(params.version);
            out.push(params.flags);
            out.extend_from_slice(&params.max_packet_len.to_be_bytes());
        }
        for header in &self.headers {
            header.encode_into(&mut out);
        }
        Ok(out)
    }

    /// Decode a packet; `with_connect_params` says whether the four CONNECT
    /// bytes follow the length field
    pub fn decode(bytes: &[u8], with_connect_params: bool) -> Result<Self, ObexError> {
        let prefix = PACKET_PREFIX_LEN + if with_connect_params { CONNECT_PARAMS_LEN } else { 0 };
        if bytes.len() < prefix {
            return Err(ObexError::TooShort {
                expected: prefix,
                actual: bytes.len(),
            });
        }
        let declared = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        if declared != bytes.len() {
            return Err(ObexError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        let connect = with_connect_params.then(|| ConnectParams {
            version: bytes[3],
            flags: bytes[4],
            max_packet_len: u16::from_be_bytes([bytes[5], bytes[6]]),
        });

        let mut headers = Vec::new();
        let mut offset = prefix;
        while offset < bytes.len() {
            let (header, used) = Header::decode(&bytes[offset..])?;
            headers.push(header);
            offset += used;
        }

        Ok(Self {
            code: bytes[0],
            connect,
            headers,
        })
    }

    /// Decode a request; only CONNECT carries connect parameters
    pub fn decode_request(bytes: &[u8]) -> Result<Self, ObexError> {
        let is_connect = bytes.first() == Some(&Opcode::Connect.as_byte());
        Self::decode(bytes, is_connect)
    }
}

// ----------------------------------------------------------------------------
// Stream I/O
// ----------------------------------------------------------------------------

/// Read one whole packet from the stream
///
/// Packets longer than `max_len` are refused before their body is read.
pub async fn read_packet<R, E>(reader: &mut R, max_len: u16) -> Result<Vec<u8>, E>
where
    R: AsyncRead + Unpin + ?Sized,
    E: From<std::io::Error> + From<ObexError>,
{
    let mut prefix = [0u8; PACKET_PREFIX_LEN];
    reader.read_exact(&mut prefix).await?;

    let length = u16::from_be_bytes([prefix[1], prefix[2]]) as usize;
    if length < PACKET_PREFIX_LEN {
        return Err(ObexError::TooShort {
            expected: PACKET_PREFIX_LEN,
            actual: length,
        }
        .into());
    }
    if length > max_len as usize {
        return Err(ObexError::TooLarge {
            length,
            max: max_len as usize,
        }
        .into());
    }

    let mut packet = vec![0u8; length];
    packet[..PACKET_PREFIX_LEN].copy_from_slice(&prefix);
    reader.read_exact(&mut packet[PACKET_PREFIX_LEN..]).await?;
    Ok(packet)
}

/// Encode and write one packet, flushing the stream
pub async fn write_packet<W, E>(writer: &mut W, packet: &Packet) -> Result<(), E>
where
    W: AsyncWrite + Unpin + ?Sized,
    E: From<std::io::Error> + From<ObexError>,
{
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
