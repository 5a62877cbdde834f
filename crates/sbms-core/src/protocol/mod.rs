//! Wire formats: tagged records, correlation ids, request validation and OBEX
//! packets

pub mod correlation_id;
pub mod obex;
pub mod record;
pub mod validation;

pub use correlation_id::{generate, generate_with};
pub use obex::{Header, HeaderValue, Opcode, Packet, ResponseCode, MIN_PACKET_LEN, VCARD_MIME_TYPE};
pub use record::{decode, decode_all, encode, Record, RecordKind};
pub use validation::{normalize_address, validate_request, validate_text, ValidatedRequest};
