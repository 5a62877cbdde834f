//! Property-based tests for the record codec and correlation ids
//!
//! These tests verify the round-trip law over arbitrary field values and the
//! determinism and spread of generated identifiers.

use proptest::prelude::*;
use sbms_core::protocol::correlation_id::generate;
use sbms_core::protocol::record::{decode, encode, escape_value, unescape_value, Record, RecordKind};
use std::collections::HashSet;

/// Field keys the codec knows about, plus one free-form extension
fn arb_key() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "msg", "to", "text", "priority", "timestamp", "id", "status", "delivery", "x-custom",
    ])
    .prop_map(str::to_string)
}

/// Values mixing plain text with the characters that need escaping
fn arb_value() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            4 => any::<char>(),
            1 => Just('\n'),
            1 => Just('\r'),
            1 => Just(';'),
            1 => Just('\\'),
            1 => Just(':'),
        ],
        0..64,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

fn arb_record() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(arb_key(), arb_value(), 0..9).prop_map(Record::from_fields)
}

proptest! {
    /// Property: decoding an encoded record yields the same fields
    #[test]
    fn round_trip_preserves_fields(record in arb_record()) {
        let decoded = decode(&encode(&record)).expect("encoded record should decode");
        prop_assert_eq!(decoded.fields(), record.fields());
        prop_assert_eq!(decoded.kind(), record.kind());
    }

    /// Property: escaping never leaves a raw line break in the output
    #[test]
    fn escaped_values_are_single_line(value in arb_value()) {
        let escaped = escape_value(&value);
        prop_assert!(!escaped.contains('\n'));
        prop_assert!(!escaped.contains('\r'));
        prop_assert_eq!(unescape_value(&escaped), value);
    }

    /// Property: the same inputs always produce the same id
    #[test]
    fn generation_is_deterministic(
        to in "\\+?[0-9]{3,15}",
        text in "\\PC{1,160}",
        secs in 0i64..4_102_444_800,
    ) {
        let first = generate(&to, &text, secs);
        let second = generate(&to, &text, secs);
        prop_assert_eq!(first.as_str().len(), 8);
        prop_assert_eq!(first, second);
    }

    /// Property: any request built from valid parts decodes as a Request
    #[test]
    fn built_requests_classify_as_requests(
        to in "\\+[0-9]{6,15}",
        text in "[a-zA-Z0-9 ;:\\\\]{1,200}",
        secs in 0i64..4_102_444_800,
    ) {
        prop_assume!(!text.trim().is_empty());
        let id = generate(&to, &text, secs);
        let record = Record::request(&to, &text, &id, Default::default(), chrono::Utc::now());
        let decoded = decode(&encode(&record)).unwrap();
        prop_assert_eq!(decoded.kind(), RecordKind::Request);
        prop_assert_eq!(decoded.text(), Some(text.as_str()));
    }
}

#[test]
fn generated_ids_rarely_collide() {
    // 20k distinct inputs over a 32-bit space: the birthday bound puts the
    // expected number of collisions well below one.
    let mut seen = HashSet::new();
    let mut collisions = 0;
    for n in 0..20_000i64 {
        let id = generate("+46701234567", &format!("message number {n}"), 1_765_465_620);
        if !seen.insert(id) {
            collisions += 1;
        }
    }
    assert!(collisions <= 2, "{collisions} collisions in 20000 ids");
}

#[test]
fn same_second_same_content_collides() {
    let a = generate("+46701234567", "Hello", 1_765_465_620);
    let b = generate("+46701234567", "Hello", 1_765_465_620);
    assert_eq!(a, b);
}
