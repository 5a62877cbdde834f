//! Correlation identifier derivation
//!
//! An identifier is the first four bytes of a digest over
//! `"{to}:{text}:{unix_seconds}"`, rendered as eight uppercase hex characters.
//! Both ends derive the same identifier for the same request without
//! coordinating, which is what lets the handset match a status response to the
//! request it sent.

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::config::IdDigest;
use crate::types::CorrelationId;

/// Derive the identifier using the default SHA-1 digest
pub fn generate(to: &str, text: &str, unix_secs: i64) -> CorrelationId {
    generate_with(IdDigest::Sha1, to, text, unix_secs)
}

/// Derive the identifier using an explicit digest
pub fn generate_with(digest: IdDigest, to: &str, text: &str, unix_secs: i64) -> CorrelationId {
    let input = format!("{to}:{text}:{unix_secs}");
    match digest {
        IdDigest::Sha1 => CorrelationId::from_digest_prefix(&Sha1::digest(input.as_bytes())),
        IdDigest::Sha256 => CorrelationId::from_digest_prefix(&Sha256::digest(input.as_bytes())),
    }
}
