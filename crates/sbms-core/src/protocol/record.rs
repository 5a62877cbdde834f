//! Tagged-record codec
//!
//! Records travel as vCard 2.1 objects whose payload lives in `X-SBMS-*`
//! properties:
//!
//! ```text
//! BEGIN:VCARD
//! VERSION:2.1
//! PRODID:-//SBMS//1.0//EN
//! X-SBMS-MSG:true
//! X-SBMS-TO:+46701234567
//! X-SBMS-TEXT:Hello
//! X-SBMS-PRIORITY:1
//! X-SBMS-TIMESTAMP:20251211T150700Z
//! X-SBMS-UUID:A3F7E2C1
//! END:VCARD
//! ```
//!
//! Decoding is line oriented and only collects prefixed tags, so the record
//! survives inside a vCard that carries ordinary contact properties too.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::{DecodeError, ValidationError};
use crate::types::{CorrelationId, Priority, StatusCode};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub const BEGIN_MARKER: &str = "BEGIN:VCARD";
pub const END_MARKER: &str = "END:VCARD";
pub const VERSION_LINE: &str = "VERSION:2.1";
pub const PRODID_LINE: &str = "PRODID:-//SBMS//1.0//EN";

/// Reserved prefix of every tag the codec collects
pub const TAG_PREFIX: &str = "X-SBMS-";

/// Wire format of the `TIMESTAMP` tag
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const LINE_END: &str = "\r\n";

/// Field keys, i.e. lower-cased tag suffixes
pub mod field {
    pub const MSG: &str = "msg";
    pub const TO: &str = "to";
    pub const TEXT: &str = "text";
    pub const PRIORITY: &str = "priority";
    pub const TIMESTAMP: &str = "timestamp";
    /// Carried on the wire as the `UUID` tag
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
    pub const DELIVERY: &str = "delivery";
}

/// Encoding order for well-known fields; the rest follow in key order
const CANONICAL_ORDER: [&str; 8] = [
    field::MSG,
    field::TO,
    field::TEXT,
    field::PRIORITY,
    field::TIMESTAMP,
    field::ID,
    field::STATUS,
    field::DELIVERY,
];

const ID_TAG: &str = "UUID";

// ----------------------------------------------------------------------------
// Record
// ----------------------------------------------------------------------------

/// Classification derived from the tags present in a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Ask the carrier to send `text` to `to`
    Request,
    /// Report the outcome of an earlier request
    StatusResponse,
    /// Framed correctly but missing the tags of any known kind
    Unknown,
}

/// A decoded tagged-text unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    kind: RecordKind,
    fields: BTreeMap<String, String>,
}

impl Record {
    /// Build a record from raw fields; keys are normalised the way the
    /// decoder normalises tag names
    pub fn from_fields<K, V, I>(fields: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = BTreeMap::new();
        for (key, value) in fields {
            if let Some(key) = normalize_key(key.as_ref()) {
                map.entry(key).or_insert_with(|| value.into());
            }
        }
        let kind = classify(&map);
        Self { kind, fields: map }
    }

    /// Build a relay request
    pub fn request(
        to: &str,
        text: &str,
        id: &CorrelationId,
        priority: Priority,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self::from_fields([
            (field::MSG, "true".to_string()),
            (field::TO, to.to_string()),
            (field::TEXT, text.to_string()),
            (field::PRIORITY, priority.as_digit().to_string()),
            (field::TIMESTAMP, format_timestamp(sent_at)),
            (field::ID, id.to_string()),
        ])
    }

    /// Build a status response for an earlier request
    pub fn status_response(id: &CorrelationId, status: StatusCode, sent_at: DateTime<Utc>) -> Self {
        Self::from_fields([
            (field::TIMESTAMP, format_timestamp(sent_at)),
            (field::ID, id.to_string()),
            (field::STATUS, status.as_wire().to_string()),
        ])
    }

    /// Return a copy with one more field set (existing values are replaced)
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        if let Some(key) = normalize_key(key) {
            self.fields.insert(key, value.into());
            self.kind = classify(&self.fields);
        }
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(field::ID)
    }

    /// The identifier parsed into its normalised form
    pub fn correlation_id(&self) -> Result<CorrelationId, ValidationError> {
        CorrelationId::parse(self.id().unwrap_or_default())
    }

    pub fn to(&self) -> Option<&str> {
        self.get(field::TO)
    }

    pub fn text(&self) -> Option<&str> {
        self.get(field::TEXT)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.get(field::STATUS).and_then(StatusCode::from_wire)
    }

    pub fn priority(&self) -> Priority {
        self.get(field::PRIORITY)
            .map(Priority::from_wire)
            .unwrap_or_default()
    }

    /// The `TIMESTAMP` tag as Unix seconds, if present and well formed
    pub fn timestamp_secs(&self) -> Option<i64> {
        self.get(field::TIMESTAMP).and_then(parse_timestamp)
    }
}

fn has_value(fields: &BTreeMap<String, String>, key: &str) -> bool {
    fields.get(key).is_some_and(|v| !v.trim().is_empty())
}

fn classify(fields: &BTreeMap<String, String>) -> RecordKind {
    if fields.contains_key(field::STATUS) {
        if has_value(fields, field::ID) && has_value(fields, field::STATUS) {
            RecordKind::StatusResponse
        } else {
            RecordKind::Unknown
        }
    } else if has_value(fields, field::TO) && has_value(fields, field::TEXT) && has_value(fields, field::ID) {
        RecordKind::Request
    } else {
        RecordKind::Unknown
    }
}

/// Map a tag suffix or field name to its field key
fn normalize_key(raw: &str) -> Option<String> {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() || key.contains([':', ';', '\r', '\n']) {
        return None;
    }
    if key == "uuid" {
        return Some(field::ID.to_string());
    }
    Some(key)
}

fn tag_for_key(key: &str) -> String {
    if key == field::ID {
        ID_TAG.to_string()
    } else {
        key.to_ascii_uppercase()
    }
}

// ----------------------------------------------------------------------------
// Timestamps
// ----------------------------------------------------------------------------

/// Render a wall-clock time as `YYYYMMDDTHHMMSSZ`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse `YYYYMMDDTHHMMSSZ` into Unix seconds
pub fn parse_timestamp(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

// ----------------------------------------------------------------------------
// Escaping
// ----------------------------------------------------------------------------

/// Escape a field value for a single tag line
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ';' => out.push_str("\\;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse `escape_value`
///
/// Unknown escape sequences are kept verbatim so values written by peers that
/// never escaped backslashes survive unchanged.
pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some('r') | Some('R') => out.push('\r'),
            Some(';') => out.push(';'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode a record as a CRLF-terminated vCard
pub fn encode(record: &Record) -> Vec<u8> {
    let mut out = String::new();
    for line in [BEGIN_MARKER, VERSION_LINE, PRODID_LINE] {
        out.push_str(line);
        out.push_str(LINE_END);
    }

    let fields = record.fields();
    let known = CANONICAL_ORDER
        .iter()
        .filter_map(|key| fields.get_key_value(*key));
    let rest = fields
        .iter()
        .filter(|(key, _)| !CANONICAL_ORDER.contains(&key.as_str()));

    for (key, value) in known.chain(rest) {
        out.push_str(TAG_PREFIX);
        out.push_str(&tag_for_key(key));
        out.push(':');
        out.push_str(&escape_value(value));
        out.push_str(LINE_END);
    }

    out.push_str(END_MARKER);
    out.push_str(LINE_END);
    out.into_bytes()
}

// ----------------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------------

/// Decode the first record in `bytes`
pub fn decode(bytes: &[u8]) -> Result<Record, DecodeError> {
    let mut decoder = LineDecoder::new(bytes)?;
    decoder
        .next_record()?
        .ok_or(DecodeError::malformed("missing BEGIN:VCARD"))
}

/// Decode every record in a buffer holding several concatenated vCards
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
    let mut decoder = LineDecoder::new(bytes)?;
    let mut records = Vec::new();
    while let Some(record) = decoder.next_record()? {
        records.push(record);
    }
    if records.is_empty() {
        return Err(DecodeError::malformed("missing BEGIN:VCARD"));
    }
    Ok(records)
}

struct LineDecoder<'a> {
    lines: std::str::Split<'a, char>,
}

impl<'a> LineDecoder<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::malformed("invalid UTF-8"))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Ok(Self {
            lines: text.split('\n'),
        })
    }

    /// Scan to the next BEGIN marker and collect tags until its END marker
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let mut fields: Option<BTreeMap<String, String>> = None;

        for raw in self.lines.by_ref() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let marker = line.trim();

            if marker.eq_ignore_ascii_case(BEGIN_MARKER) {
                // A second BEGIN without END restarts the record.
                fields = Some(BTreeMap::new());
                continue;
            }
            if fields.is_none() {
                continue;
            }
            if marker.eq_ignore_ascii_case(END_MARKER) {
                let fields = fields.take().unwrap_or_default();
                let kind = classify(&fields);
                return Ok(Some(Record { kind, fields }));
            }
            if let (Some(collected), Some((key, value))) = (fields.as_mut(), parse_tag_line(line)) {
                collected.entry(key).or_insert(value);
            }
        }

        match fields {
            Some(_) => Err(DecodeError::malformed("missing END:VCARD")),
            None => Ok(None),
        }
    }
}

/// Split `NAME[;PARAMS]:value` and keep it only if NAME carries the prefix
fn parse_tag_line(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.split(';').next().unwrap_or_default().trim();
    let prefix = name.get(..TAG_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(TAG_PREFIX) {
        return None;
    }
    let key = normalize_key(&name[TAG_PREFIX.len()..])?;
    Some((key, unescape_value(value)))
}
