//! Core types shared across the SBMS protocol

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use core::time::Duration;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp on a monotonic clock
///
/// Only differences between timestamps from the same `TimeSource` are
/// meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Create a timestamp from whole seconds
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Provides the current monotonic timestamp
///
/// Components that track ages take a `TimeSource` so tests can drive time
/// explicitly.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Process-relative monotonic clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed().as_millis() as u64)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

#[cfg(any(test, feature = "testing"))]
mod manual {
    use super::{TimeSource, Timestamp};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Manually driven time source for deterministic tests
    ///
    /// Clones share the same clock.
    #[derive(Debug, Clone, Default)]
    pub struct ManualTimeSource {
        current: Arc<AtomicU64>,
    }

    impl ManualTimeSource {
        /// Create a manual clock starting at zero
        pub fn new() -> Self {
            Self::default()
        }

        /// Advance the clock by `millis`
        pub fn advance(&self, millis: u64) {
            self.current.fetch_add(millis, Ordering::SeqCst);
        }

        /// Set the clock to an absolute value
        pub fn set(&self, timestamp: Timestamp) {
            self.current.store(timestamp.as_millis(), Ordering::SeqCst);
        }
    }

    impl TimeSource for ManualTimeSource {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.current.load(Ordering::SeqCst))
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use manual::ManualTimeSource;

// ----------------------------------------------------------------------------
// Correlation Identifier
// ----------------------------------------------------------------------------

/// Number of hex characters in a correlation identifier
pub const CORRELATION_ID_LEN: usize = 8;

/// Eight uppercase hex characters linking a request to its status response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Parse and normalise an identifier (hex digits are uppercased)
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.len() != CORRELATION_ID_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidId { id: raw.to_string() });
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Build from the leading digest bytes
    pub(crate) fn from_digest_prefix(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(&bytes[..CORRELATION_ID_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Priority
// ----------------------------------------------------------------------------

/// Relay priority carried in the `PRIORITY` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_digit(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }

    /// Parse the wire digit; anything unknown is treated as `Normal`
    pub fn from_wire(value: &str) -> Self {
        match value.trim() {
            "0" => Priority::Low,
            "2" => Priority::High,
            _ => Priority::Normal,
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Status
// ----------------------------------------------------------------------------

/// Status value carried in the `STATUS` tag of a status response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The send primitive accepted the message
    Sent,
    /// The send primitive failed
    Failed,
    /// The destination network confirmed delivery
    Delivered,
    /// The request was invalid and never handed to the send primitive
    Rejected,
}

impl StatusCode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            StatusCode::Sent => "SENT",
            StatusCode::Failed => "FAILED",
            StatusCode::Delivered => "DELIVERED",
            StatusCode::Rejected => "REJECTED",
        }
    }

    /// Parse a wire value, case-insensitively
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SENT" => Some(StatusCode::Sent),
            "FAILED" => Some(StatusCode::Failed),
            "DELIVERED" => Some(StatusCode::Delivered),
            "REJECTED" => Some(StatusCode::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}
