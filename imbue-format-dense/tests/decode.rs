//! End-to-end decoding tests against hand-assembled dense fixtures.

use std::collections::HashMap;
use std::time::Duration;

use imbue_core::{ExtValue, Value};
use imbue_derive::Reflect;
use imbue_format::DecodeError;
use imbue_format_dense::{from_reader, from_slice, DenseHandle, TIMESTAMP_EXT_TAG};

/// Encode a uint in the smallest width.
fn push_uint(out: &mut Vec<u8>, value: u64) {
    if value == 0 {
        out.push(0x03);
        return;
    }
    let width = (8 - value.leading_zeros() as usize / 8).max(1);
    out.push(0x10 | (width as u8 - 1));
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

/// Inline-length string; only valid below 12 bytes.
fn push_str(out: &mut Vec<u8>, text: &str) {
    out.push(0x40 | text.len() as u8);
    out.extend_from_slice(text.as_bytes());
}

#[derive(Reflect, Debug, Default, PartialEq)]
struct Sample {
    count: u64,
    label: String,
    elapsed: Duration,
}

#[test]
fn specials_decode() {
    let mut b = true;
    from_slice(&[0x01], &mut b).unwrap();
    assert!(!b);
    from_slice(&[0x02], &mut b).unwrap();
    assert!(b);

    let mut n = 7u32;
    from_slice(&[0x03], &mut n).unwrap();
    assert_eq!(n, 0);

    let mut preset = 9i64;
    from_slice(&[0x00], &mut preset).unwrap();
    assert_eq!(preset, 0);
}

#[test]
fn uints_decode_across_widths() {
    for value in [1u64, 0xff, 0x100, 0xffff_ffff, u64::MAX] {
        let mut bytes = Vec::new();
        push_uint(&mut bytes, value);
        let mut target = 0u64;
        from_slice(&bytes, &mut target).unwrap();
        assert_eq!(target, value);
    }
}

#[test]
fn negative_ints_decode() {
    // -5: magnitude 5 in one byte
    let mut target = 0i64;
    from_slice(&[0x20, 0x05], &mut target).unwrap();
    assert_eq!(target, -5);

    // i64::MIN: magnitude 2^63 in eight bytes
    let mut bytes = vec![0x27];
    bytes.extend_from_slice(&(1u64 << 63).to_be_bytes());
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, i64::MIN);
}

#[test]
fn magnitude_past_i64_min_overflows() {
    let mut bytes = vec![0x27];
    bytes.extend_from_slice(&((1u64 << 63) + 1).to_be_bytes());
    let mut target = 0i64;
    let err = from_slice(&bytes, &mut target).unwrap_err();
    assert!(matches!(err, DecodeError::Overflow { .. }));
}

#[test]
fn negative_into_unsigned_overflows() {
    let mut target = 0u32;
    let err = from_slice(&[0x20, 0x05], &mut target).unwrap_err();
    assert!(matches!(err, DecodeError::Overflow { .. }));
}

#[test]
fn narrowing_overflow_is_detected() {
    let mut bytes = Vec::new();
    push_uint(&mut bytes, 1 << 40);
    let mut target = 0i32;
    let err = from_slice(&bytes, &mut target).unwrap_err();
    match err {
        DecodeError::Overflow { target, .. } => assert_eq!(target, "i32"),
        other => panic!("expected Overflow, got {other:?}"),
    }
}

#[test]
fn floats_decode_both_widths() {
    let mut bytes = vec![0x34];
    bytes.extend_from_slice(&1.25f32.to_be_bytes());
    let mut single = 0f32;
    from_slice(&bytes, &mut single).unwrap();
    assert_eq!(single, 1.25);

    let mut bytes = vec![0x38];
    bytes.extend_from_slice(&(-0.5f64).to_be_bytes());
    let mut double = 0f64;
    from_slice(&bytes, &mut double).unwrap();
    assert_eq!(double, -0.5);
}

#[test]
fn ints_widen_into_float_destinations() {
    let mut bytes = Vec::new();
    push_uint(&mut bytes, 3);
    let mut target = 0f64;
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, 3.0);
}

#[test]
fn strings_decode_inline_and_prefixed() {
    let mut target = String::new();
    from_slice(&[0x42, b'h', b'i'], &mut target).unwrap();
    assert_eq!(target, "hi");

    // 0x4c: u8 length prefix
    let long = "a dozen and more bytes";
    let mut bytes = vec![0x4c, long.len() as u8];
    bytes.extend_from_slice(long.as_bytes());
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, long);
}

#[test]
fn bytes_decode() {
    let mut target: Vec<u8> = Vec::new();
    from_slice(&[0x53, 0x0a, 0x0b, 0x0c], &mut target).unwrap();
    assert_eq!(target, vec![0x0a, 0x0b, 0x0c]);
}

#[test]
fn arrays_update_in_place() {
    // [1, 2] into a longer preset vec
    let mut bytes = vec![0x62];
    push_uint(&mut bytes, 1);
    push_uint(&mut bytes, 2);
    let mut target = vec![9u64, 9, 9];
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, vec![1, 2, 9]);
}

#[test]
fn maps_decode_into_typed_destinations() {
    // {"k": 7}
    let mut bytes = vec![0x71];
    push_str(&mut bytes, "k");
    push_uint(&mut bytes, 7);
    let mut target: HashMap<String, u64> = HashMap::new();
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target["k"], 7);
}

#[test]
fn struct_decodes_with_native_timestamp_field() {
    // {"count": 3, "label": "run", "elapsed": 2s + 500ns}
    let mut bytes = vec![0x73];
    push_str(&mut bytes, "count");
    push_uint(&mut bytes, 3);
    push_str(&mut bytes, "label");
    push_str(&mut bytes, "run");
    push_str(&mut bytes, "elapsed");
    bytes.push(0x80);
    bytes.extend_from_slice(&2u64.to_be_bytes());
    bytes.extend_from_slice(&500u32.to_be_bytes());

    let mut sample = Sample::default();
    from_slice(&bytes, &mut sample).unwrap();
    assert_eq!(
        sample,
        Sample {
            count: 3,
            label: "run".into(),
            elapsed: Duration::new(2, 500),
        }
    );
}

#[test]
fn builtin_timestamp_decodes_directly() {
    let mut bytes = vec![0x80];
    bytes.extend_from_slice(&10u64.to_be_bytes());
    bytes.extend_from_slice(&1u32.to_be_bytes());
    let mut target = Duration::ZERO;
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, Duration::new(10, 1));
}

#[test]
fn builtin_timestamp_reaches_through_pointers() {
    let mut bytes = vec![0x80];
    bytes.extend_from_slice(&4u64.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    let mut target: Option<Duration> = None;
    from_slice(&bytes, &mut target).unwrap();
    assert_eq!(target, Some(Duration::new(4, 0)));
}

#[test]
fn oversized_nanoseconds_are_rejected() {
    let mut bytes = vec![0x80];
    bytes.extend_from_slice(&0u64.to_be_bytes());
    bytes.extend_from_slice(&1_000_000_000u32.to_be_bytes());
    let mut target = Duration::ZERO;
    let err = from_slice(&bytes, &mut target).unwrap_err();
    assert!(matches!(err, DecodeError::Overflow { .. }));
}

#[test]
fn naked_decode_synthesizes_by_stream_shape() {
    let mut v = Value::Null;
    from_slice(&[0x00], &mut v).unwrap();
    assert!(v.is_null());

    let mut v = Value::Null;
    from_slice(&[0x10, 0x2a], &mut v).unwrap();
    assert_eq!(v, Value::U64(42));

    let mut v = Value::Null;
    from_slice(&[0x20, 0x01], &mut v).unwrap();
    assert_eq!(v, Value::I64(-1));

    // {"k": [true, nil]}
    let mut bytes = vec![0x71];
    push_str(&mut bytes, "k");
    bytes.extend_from_slice(&[0x62, 0x02, 0x00]);
    let mut v = Value::Null;
    from_slice(&bytes, &mut v).unwrap();
    let Value::Map(map) = &v else {
        panic!("expected map, got {v:?}");
    };
    assert_eq!(
        map[&Value::Str("k".into())],
        Value::Seq(vec![Value::Bool(true), Value::Null])
    );
}

#[test]
fn naked_timestamp_surfaces_as_extension() {
    let mut bytes = vec![0x80];
    bytes.extend_from_slice(&1u64.to_be_bytes());
    bytes.extend_from_slice(&2u32.to_be_bytes());
    let mut v = Value::Null;
    from_slice(&bytes, &mut v).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&1u64.to_be_bytes());
    expected.extend_from_slice(&2u32.to_be_bytes());
    assert_eq!(
        v,
        Value::Ext(ExtValue {
            tag: TIMESTAMP_EXT_TAG,
            data: expected,
        })
    );
}

#[test]
fn extensions_roundtrip_with_registered_tag() {
    #[derive(Reflect, Debug, Default, PartialEq)]
    struct Token {
        raw: u16,
    }

    let mut handle = DenseHandle::new();
    handle
        .register_ext::<Token, _>(9, |token, data| {
            if data.len() != 2 {
                return Err("token payload must be 2 bytes".into());
            }
            token.raw = u16::from_be_bytes([data[0], data[1]]);
            Ok(())
        })
        .unwrap();

    // ext: tag 9, u32 length 2, payload
    let bytes = [0xf0, 0x09, 0, 0, 0, 2, 0xbe, 0xef];
    let mut decoder = handle.decoder_bytes(&bytes);
    let mut token = Token::default();
    decoder.decode(&mut token).unwrap();
    assert_eq!(token.raw, 0xbeef);

    let wrong_tag = [0xf0, 0x08, 0, 0, 0, 2, 0xbe, 0xef];
    let mut decoder = handle.decoder_bytes(&wrong_tag);
    let mut token = Token::default();
    let err = decoder.decode(&mut token).unwrap_err();
    assert!(matches!(err, DecodeError::ExtensionTagMismatch { .. }));
}

#[test]
fn undefined_descriptors_are_rejected() {
    for descriptor in [0x0f, 0x18, 0x33, 0x81, 0x90, 0xa0, 0xf1] {
        let mut v = Value::Null;
        let err = from_slice(&[descriptor], &mut v).unwrap_err();
        assert!(
            matches!(err, DecodeError::BadDescriptor { .. }),
            "descriptor {descriptor:#04x} should be rejected"
        );
    }
}

#[test]
fn truncated_payload_reports_short_read() {
    // announces a 4-byte uint, delivers 2
    let mut target = 0u64;
    let err = from_slice(&[0x13, 0x01, 0x02], &mut target).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::ShortRead { .. } | DecodeError::Eof
    ));
}

#[test]
fn reader_backed_decoding_works() {
    let mut bytes = vec![0x71];
    push_str(&mut bytes, "n");
    push_uint(&mut bytes, 5);
    let mut target: HashMap<String, u64> = HashMap::new();
    from_reader(std::io::Cursor::new(bytes), &mut target).unwrap();
    assert_eq!(target["n"], 5);
}

#[test]
fn whole_input_is_consumed() {
    let mut bytes = vec![0x72];
    push_str(&mut bytes, "a");
    push_uint(&mut bytes, 1);
    push_str(&mut bytes, "b");
    bytes.extend_from_slice(&[0x62, 0x00, 0x02]);

    let handle = DenseHandle::new();
    let mut decoder = handle.decoder_bytes(&bytes);
    let mut v = Value::Null;
    decoder.decode(&mut v).unwrap();
    assert_eq!(decoder.into_driver().into_reader().remaining(), 0);
}
