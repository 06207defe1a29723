//! Guildlink Codec - bijective snowflake encoding
//!
//! Externally issued 64-bit snowflake identifiers are embedded into 128-bit
//! account identifiers so that the byte-lexicographic order of the encoded
//! values equals the numeric order of the inputs. Encoded values are tagged
//! with UUID version-8 and RFC 4122 variant marker bits; decoding anything
//! without both markers fails cleanly.
//!
//! Byte layout (big-endian within each span):
//!
//! ```text
//! bytes 0..6   bits 71..24 of the zero-extended snowflake (high 48 bits)
//! byte  6      0x80 - version marker (custom UUID version 8)
//! byte  7      0x00
//! byte  8      0x80 - RFC 4122 variant marker
//! bytes 9..12  bits 23..0 of the snowflake (low 24 bits)
//! bytes 12..16 0x00
//! ```
//!
//! The nil account identifier carries neither marker, so the encoding of
//! snowflake `0` never collides with the "absent" sentinel.

#![deny(unsafe_code)]

use guildlink_types::{AccountId, LinkError, LinkResult};
use uuid::Uuid;

/// Version marker: UUID version 8 (custom), stored in the high nibble of
/// byte 6.
const VERSION_BYTE: u8 = 0x80;

/// Variant marker: RFC 4122 (`10xxxxxx`), stored in the top bits of byte 8.
const VARIANT_BITS: u8 = 0x80;
const VARIANT_MASK: u8 = 0xC0;

/// Encodes a snowflake into a marked, order-preserving account identifier.
///
/// The layout reserves 72 value bits (48 high + 24 low), so every `u64`
/// fits; the operation is total and deterministic.
pub fn encode_snowflake(snowflake: u64) -> AccountId {
    let mut bytes = [0u8; 16];

    // High 48 bits of the zero-extended 72-bit value.
    let high = snowflake >> 24;
    bytes[0] = (high >> 40) as u8;
    bytes[1] = (high >> 32) as u8;
    bytes[2] = (high >> 24) as u8;
    bytes[3] = (high >> 16) as u8;
    bytes[4] = (high >> 8) as u8;
    bytes[5] = high as u8;

    bytes[6] = VERSION_BYTE;
    bytes[8] = VARIANT_BITS;

    // Low 24 bits.
    bytes[9] = (snowflake >> 16) as u8;
    bytes[10] = (snowflake >> 8) as u8;
    bytes[11] = snowflake as u8;

    AccountId::new(Uuid::from_bytes(bytes))
}

/// Recovers the snowflake from an encoded account identifier.
///
/// Returns `None` when the version or variant marker bits are absent
/// (including for the nil identifier) or when the carried value exceeds the
/// 64-bit snowflake domain. Never panics, for any 128-bit input.
pub fn decode_snowflake(id: &AccountId) -> Option<u64> {
    let bytes = id.as_bytes();

    if bytes[6] >> 4 != VERSION_BYTE >> 4 {
        return None;
    }
    if bytes[8] & VARIANT_MASK != VARIANT_BITS {
        return None;
    }

    let high = (bytes[0] as u64) << 40
        | (bytes[1] as u64) << 32
        | (bytes[2] as u64) << 24
        | (bytes[3] as u64) << 16
        | (bytes[4] as u64) << 8
        | bytes[5] as u64;
    let low = (bytes[9] as u64) << 16 | (bytes[10] as u64) << 8 | bytes[11] as u64;

    // The wire layout carries 72 bits; reject values outside the snowflake
    // domain rather than wrapping.
    let value = (high as u128) << 24 | low as u128;
    u64::try_from(value).ok()
}

/// Parses the decimal text form snowflakes are issued in.
pub fn parse_snowflake(s: &str) -> LinkResult<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| LinkError::InvalidInput(format!("malformed snowflake: {s:?}")))
}

/// Encodes a snowflake given in decimal text form.
pub fn encode_snowflake_str(s: &str) -> LinkResult<AccountId> {
    parse_snowflake(s).map(encode_snowflake)
}

/// Decodes back to decimal text, or `None` for unmarked identifiers.
pub fn decode_snowflake_string(id: &AccountId) -> Option<String> {
    decode_snowflake(id).map(|snowflake| snowflake.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip_known_snowflake() {
        let snowflake = 695081603180789771u64;
        let id = encode_snowflake(snowflake);
        assert_eq!(decode_snowflake(&id), Some(snowflake));
        assert_eq!(decode_snowflake_string(&id).as_deref(), Some("695081603180789771"));
    }

    #[test]
    fn test_adjacent_snowflakes_preserve_order() {
        let a = encode_snowflake(695081603180789771);
        let b = encode_snowflake(695081603180789772);
        assert!(a.as_bytes() < b.as_bytes());
    }

    #[test]
    fn test_zero_is_encodable_and_distinct_from_nil() {
        let id = encode_snowflake(0);
        assert!(!id.is_nil());
        assert_eq!(decode_snowflake(&id), Some(0));
    }

    #[test]
    fn test_nil_identifier_does_not_decode() {
        assert_eq!(decode_snowflake(&AccountId::nil()), None);
    }

    #[test]
    fn test_random_uuid_does_not_decode() {
        // Version 4 fails the version marker check.
        let id = AccountId::new(Uuid::new_v4());
        assert_eq!(decode_snowflake(&id), None);
    }

    #[test]
    fn test_wrong_variant_does_not_decode() {
        let mut bytes = *encode_snowflake(12345).as_bytes();
        bytes[8] = 0x00;
        assert_eq!(decode_snowflake(&AccountId::new(Uuid::from_bytes(bytes))), None);
    }

    #[test]
    fn test_out_of_domain_payload_does_not_decode() {
        // Marker bits present but the 72-bit payload exceeds u64.
        let mut bytes = [0u8; 16];
        bytes[0] = 0xFF;
        bytes[6] = 0x80;
        bytes[8] = 0x80;
        assert_eq!(decode_snowflake(&AccountId::new(Uuid::from_bytes(bytes))), None);
    }

    #[test]
    fn test_encode_from_text_matches_numeric_encoding() {
        let id = encode_snowflake(695081603180789771);
        assert_eq!(encode_snowflake_str("695081603180789771").unwrap(), id);
        assert_eq!(encode_snowflake_str(" 695081603180789771 ").unwrap(), id);
        assert!(encode_snowflake_str("not-a-snowflake").is_err());
    }

    #[test]
    fn test_parse_snowflake_rejects_malformed_text() {
        assert!(parse_snowflake("not-a-number").is_err());
        assert!(parse_snowflake("-42").is_err());
        assert!(parse_snowflake("").is_err());
        assert_eq!(parse_snowflake(" 42 ").unwrap(), 42);
    }

    proptest! {
        #[test]
        fn prop_round_trip(snowflake in any::<u64>()) {
            let id = encode_snowflake(snowflake);
            prop_assert_eq!(decode_snowflake(&id), Some(snowflake));
        }

        #[test]
        fn prop_order_preserved(a in any::<u64>(), b in any::<u64>()) {
            prop_assume!(a < b);
            let ea = encode_snowflake(a);
            let eb = encode_snowflake(b);
            prop_assert!(ea.as_bytes() < eb.as_bytes());
        }

        #[test]
        fn prop_decode_never_panics(bytes in any::<[u8; 16]>()) {
            let _ = decode_snowflake(&AccountId::new(Uuid::from_bytes(bytes)));
        }
    }
}
