//! Tests for message id generation.

use super::*;

#[test]
fn test_message_id_shape() {
    let id = new_message_id();

    let suffix = id.strip_prefix("message_").expect("id should be prefixed");
    assert_eq!(suffix.len(), 26);
    assert!(suffix.bytes().all(|b| CROCKFORD_ALPHABET.contains(&b)));
    // 130 bits of room for 128 bits of id: the first character stays below 8.
    assert!(suffix.as_bytes()[0] <= b'7');
}

#[test]
fn test_encode_base32_known_values() {
    assert_eq!(encode_base32(Uuid::nil()), "00000000000000000000000000");
    assert_eq!(encode_base32(Uuid::from_u128(u128::MAX)), "7zzzzzzzzzzzzzzzzzzzzzzzzz");
    assert_eq!(
        encode_base32(Uuid::from_u128(1)),
        "00000000000000000000000001"
    );
}

#[test]
fn test_message_ids_sort_by_creation() {
    let first = new_message_id();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = new_message_id();

    assert!(first < second);
}
