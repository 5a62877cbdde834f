//! Request validation
//!
//! Checks a decoded request before it reaches the send primitive. A request
//! that fails here is answered with `REJECTED` and never sent.

use crate::config::ValidationConfig;
use crate::errors::ValidationError;
use crate::protocol::record::Record;
use crate::types::{CorrelationId, Priority};

/// Characters people put inside phone numbers for readability
const ADDRESS_SEPARATORS: [char; 5] = [' ', '-', '.', '(', ')'];

/// A request whose address, text and identifier passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    /// Normalised address: optional leading `+` followed by digits
    pub to: String,
    pub text: String,
    pub id: CorrelationId,
    pub priority: Priority,
}

/// Strip separators and check the digit count
pub fn normalize_address(raw: &str, config: &ValidationConfig) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidAddress {
        address: raw.to_string(),
    };

    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !ADDRESS_SEPARATORS.contains(c))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let count = digits.len();
    if count < config.min_address_digits || count > config.max_address_digits {
        return Err(invalid());
    }
    Ok(compact)
}

/// Check that the text is non-blank and fits the send primitive
pub fn validate_text(text: &str, config: &ValidationConfig) -> Result<(), ValidationError> {
    let length = text.chars().count();
    if text.trim().is_empty() || length > config.max_text_chars {
        return Err(ValidationError::InvalidLength {
            length,
            max: config.max_text_chars,
        });
    }
    Ok(())
}

/// Validate every field the relay needs from a request record
pub fn validate_request(record: &Record, config: &ValidationConfig) -> Result<ValidatedRequest, ValidationError> {
    let id = record.correlation_id()?;
    let to = normalize_address(record.to().unwrap_or_default(), config)?;
    let text = record.text().unwrap_or_default();
    validate_text(text, config)?;

    Ok(ValidatedRequest {
        to,
        text: text.to_string(),
        id,
        priority: record.priority(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("+46 70-123 45 67", &config()).unwrap(), "+46701234567");
        assert_eq!(normalize_address("(070) 123.4567", &config()).unwrap(), "0701234567");
        assert_eq!(normalize_address("112", &config()).unwrap(), "112");
    }

    #[test]
    fn test_reject_bad_addresses() {
        for bad in ["", "+", "12", "+46abc", "1234567890123456", "++4670", "46+70"] {
            assert!(
                matches!(normalize_address(bad, &config()), Err(ValidationError::InvalidAddress { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_text_limits() {
        assert!(validate_text("Hello", &config()).is_ok());
        assert!(validate_text("   ", &config()).is_err());
        assert!(validate_text("", &config()).is_err());

        let exact = "é".repeat(config().max_text_chars);
        assert!(validate_text(&exact, &config()).is_ok());
        let long = "x".repeat(config().max_text_chars + 1);
        assert_eq!(
            validate_text(&long, &config()),
            Err(ValidationError::InvalidLength {
                length: 1_531,
                max: 1_530
            })
        );
    }

    #[test]
    fn test_validate_request() {
        let record = Record::from_fields([
            ("to", "+46 70 123 45 67"),
            ("text", "Hej"),
            ("uuid", "a3f7e2c1"),
            ("priority", "2"),
        ]);
        let request = validate_request(&record, &config()).unwrap();
        assert_eq!(request.to, "+46701234567");
        assert_eq!(request.id.as_str(), "A3F7E2C1");
        assert_eq!(request.priority, Priority::High);
    }

    #[test]
    fn test_validate_request_bad_id() {
        let record = Record::from_fields([("to", "+4670123"), ("text", "Hej"), ("uuid", "nothex!!")]);
        assert!(matches!(
            validate_request(&record, &config()),
            Err(ValidationError::InvalidId { .. })
        ));
    }
}
