//! LEB128 varint and zig-zag tests used by the front-coded block encodings.

use crate::encoding::*;

#[test]
fn varint_small_values_take_one_byte() {
    for v in [0u64, 1, 42, 127] {
        let mut buf = Vec::new();
        encode_varint(v, &mut buf);
        assert_eq!(buf.len(), 1, "value {v}");
        assert_eq!(decode_varint(&buf).unwrap(), (v, 1));
    }
}

#[test]
fn varint_boundaries() {
    let cases = [
        (128u64, vec![0x80, 0x01]),
        (300, vec![0xAC, 0x02]),
        (16_383, vec![0xFF, 0x7F]),
        (16_384, vec![0x80, 0x80, 0x01]),
    ];
    for (value, expected) in cases {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf);
        assert_eq!(buf, expected, "value {value}");
        assert_eq!(decode_varint(&buf).unwrap(), (value, expected.len()));
    }
}

#[test]
fn varint_u64_max_uses_ten_bytes() {
    let mut buf = Vec::new();
    encode_varint(u64::MAX, &mut buf);
    assert_eq!(buf.len(), MAX_VARINT_LEN);
    assert_eq!(decode_varint(&buf).unwrap(), (u64::MAX, MAX_VARINT_LEN));
}

#[test]
fn varint_truncated_is_eof() {
    let err = decode_varint(&[0x80, 0x80]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
    let err = decode_varint(&[]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn varint_overlong_is_rejected() {
    // Eleven continuation bytes can never be a valid u64.
    let buf = [0xFFu8; 11];
    let err = decode_varint(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidVarint));

    // Ten bytes whose last byte carries more than the top bit overflow u64.
    let mut buf = vec![0xFFu8; 9];
    buf.push(0x02);
    let err = decode_varint(&buf).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidVarint));
}

#[test]
fn zigzag_keeps_small_magnitudes_small() {
    assert_eq!(zigzag_encode(0), 0);
    assert_eq!(zigzag_encode(-1), 1);
    assert_eq!(zigzag_encode(1), 2);
    assert_eq!(zigzag_encode(-2), 3);
    for v in [0i64, 5, -5, i64::MIN, i64::MAX] {
        assert_eq!(zigzag_decode(zigzag_encode(v)), v);
    }
}
