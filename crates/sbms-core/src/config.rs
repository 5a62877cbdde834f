//! Centralized Configuration Management
//!
//! All timeouts are stored as integer milliseconds so the structs stay readable
//! in TOML and environment overrides; accessors hand out `Duration`s.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Timeouts and packet sizing for one object-exchange session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for the CONNECT exchange
    pub handshake_timeout_ms: u64,
    /// Time allowed for the peer to acknowledge each PUT packet and DISCONNECT
    pub ack_timeout_ms: u64,
    /// Largest packet we are willing to send or receive
    pub max_packet_len: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            ack_timeout_ms: 10_000,
            max_packet_len: 4_096,
        }
    }
}

impl SessionConfig {
    /// Create configuration optimized for testing (short timeouts)
    pub fn testing() -> Self {
        Self {
            handshake_timeout_ms: 200,
            ack_timeout_ms: 200,
            max_packet_len: 4_096,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Correlation Configuration
// ----------------------------------------------------------------------------

/// Digest used to derive correlation identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdDigest {
    /// SHA-1, compatible with the deployed handset implementations
    #[default]
    Sha1,
    /// SHA-256, only when both peers are configured for it
    Sha256,
}

/// Expiry policy for in-flight correlations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Age after which an unresolved correlation expires
    pub expiry_timeout_ms: u64,
    /// Interval of the background sweep
    pub sweep_interval_ms: u64,
    /// Keep a sent request open until a DELIVERED/FAILED status arrives
    pub await_delivery_report: bool,
    /// Digest for locally generated identifiers
    pub id_digest: IdDigest,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            expiry_timeout_ms: 30_000,
            sweep_interval_ms: 5_000,
            await_delivery_report: false,
            id_digest: IdDigest::Sha1,
        }
    }
}

impl CorrelationConfig {
    /// Create configuration optimized for testing (fast expiry)
    pub fn testing() -> Self {
        Self {
            expiry_timeout_ms: 500,
            sweep_interval_ms: 50,
            ..Self::default()
        }
    }

    pub fn expiry_timeout(&self) -> Duration {
        Duration::from_millis(self.expiry_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// ----------------------------------------------------------------------------
// Validation Configuration
// ----------------------------------------------------------------------------

/// Acceptance rules for relay requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_address_digits: usize,
    pub max_address_digits: usize,
    /// Longest text the send primitive accepts (ten concatenated GSM-7 segments)
    pub max_text_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_address_digits: 3,
            max_address_digits: 15,
            max_text_chars: 1_530,
        }
    }
}

// ----------------------------------------------------------------------------
// Relay Configuration
// ----------------------------------------------------------------------------

/// Orchestrator policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Time allowed for the send primitive
    pub send_timeout_ms: u64,
    /// Push attempts per status record, each on a fresh session
    pub max_push_attempts: u32,
    /// Answer invalid requests with a REJECTED status
    pub reply_on_rejection: bool,
    /// How long completed relays are remembered for duplicate detection
    pub dedup_window_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 30_000,
            max_push_attempts: 2,
            reply_on_rejection: true,
            dedup_window_ms: 300_000,
        }
    }
}

impl RelayConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            send_timeout_ms: 200,
            max_push_attempts: 2,
            reply_on_rejection: true,
            dedup_window_ms: 1_000,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

// ----------------------------------------------------------------------------
// Complete Configuration
// ----------------------------------------------------------------------------

/// Every core setting in one place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SbmsConfig {
    pub session: SessionConfig,
    pub correlation: CorrelationConfig,
    pub validation: ValidationConfig,
    pub relay: RelayConfig,
}

impl SbmsConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            session: SessionConfig::testing(),
            correlation: CorrelationConfig::testing(),
            validation: ValidationConfig::default(),
            relay: RelayConfig::testing(),
        }
    }

    /// Check the settings for values that would make the relay unusable
    pub fn validate(&self) -> Result<(), String> {
        if self.session.handshake_timeout_ms == 0 || self.session.ack_timeout_ms == 0 {
            return Err("Session timeouts must be greater than 0".to_string());
        }
        if self.session.max_packet_len < crate::protocol::obex::MIN_PACKET_LEN {
            return Err(format!(
                "max_packet_len must be at least {}",
                crate::protocol::obex::MIN_PACKET_LEN
            ));
        }
        if self.correlation.expiry_timeout_ms == 0 || self.correlation.sweep_interval_ms == 0 {
            return Err("Correlation timeouts must be greater than 0".to_string());
        }
        if self.validation.min_address_digits > self.validation.max_address_digits {
            return Err("min_address_digits exceeds max_address_digits".to_string());
        }
        if self.validation.max_text_chars == 0 {
            return Err("max_text_chars must be greater than 0".to_string());
        }
        if self.relay.max_push_attempts == 0 {
            return Err("max_push_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
