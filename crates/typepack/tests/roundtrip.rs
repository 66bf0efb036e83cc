//! Round-trip identity and zero-copy behavior.

use std::borrow::Cow;

use num_bigint::BigInt;
use typepack::{
    pack, pack_with_config, unpack, unpack_with_config, BoolBitList, Config, Decoder, ExtValue,
    PackDateTime, TypedArray, Value,
};
use url::Url;

fn roundtrip(value: Value<'static>) {
    let bytes = pack(&value).expect("encode");
    let back = unpack(&bytes).expect("decode");
    assert_eq!(back, value, "roundtrip through {} bytes", bytes.len());
}

#[test]
fn scalars() {
    roundtrip(Value::Null);
    roundtrip(Value::Bool(true));
    roundtrip(Value::Bool(false));
    for i in [
        0i64,
        1,
        127,
        128,
        255,
        256,
        65535,
        65536,
        -1,
        -32,
        -33,
        -128,
        -129,
        -32768,
        -32769,
        i64::from(i32::MIN),
        i64::from(i32::MIN) - 1,
        i64::MAX,
        i64::MIN,
    ] {
        roundtrip(Value::Int(i));
    }
    roundtrip(Value::UInt(u64::MAX));
    roundtrip(Value::UInt(i64::MAX as u64 + 1));
    for f in [0.0f64, -0.0, 1.5, -2.75, f64::INFINITY, f64::NEG_INFINITY] {
        roundtrip(Value::Float(f));
    }
}

#[test]
fn nan_roundtrips_as_nan() {
    let bytes = pack(&Value::Float(f64::NAN)).unwrap();
    match unpack(&bytes).unwrap() {
        Value::Float(f) => assert!(f.is_nan()),
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn strings_and_bytes() {
    roundtrip(Value::text(""));
    roundtrip(Value::text("ascii only"));
    roundtrip(Value::text("späße 💬 ñ"));
    roundtrip(Value::text("x".repeat(70_000)));
    roundtrip(Value::bytes(Vec::new()));
    roundtrip(Value::bytes((0u8..=255).collect::<Vec<u8>>()));
}

#[test]
fn big_integers_beyond_u64() {
    roundtrip(Value::BigInt(BigInt::from(u64::MAX) + 1));
    roundtrip(Value::BigInt(BigInt::from(1) << 200));
    roundtrip(Value::BigInt(-(BigInt::from(1i32) << 100u32)));
}

#[test]
fn small_big_integers_surface_as_host_ints_when_interop_is_off() {
    let bytes = pack(&Value::BigInt(BigInt::from(-5))).unwrap();
    assert_eq!(unpack(&bytes).unwrap(), Value::Int(-5));
    let bytes = pack(&Value::BigInt(BigInt::from(u64::MAX))).unwrap();
    assert_eq!(unpack(&bytes).unwrap(), Value::UInt(u64::MAX));
}

#[test]
fn dates_durations_uris() {
    roundtrip(Value::DateTime(PackDateTime::new(1_696_075_200_000_000, true)));
    roundtrip(Value::DateTime(PackDateTime::new(-62_135_596_800_000_000, false)));
    roundtrip(Value::Duration(0));
    roundtrip(Value::Duration(-86_400_000_000));
    roundtrip(Value::Uri(Url::parse("https://example.com/a?b=1&c=%20").unwrap()));
    roundtrip(Value::Uri(Url::parse("file:///tmp/data.bin").unwrap()));
}

#[test]
fn all_nine_typed_array_kinds() {
    roundtrip(Value::TypedArray(TypedArray::from_i8s(&[-128, -1, 0, 127])));
    roundtrip(Value::TypedArray(TypedArray::from_u16s(&[0, 1, 65535])));
    roundtrip(Value::TypedArray(TypedArray::from_i16s(&[-32768, 32767])));
    roundtrip(Value::TypedArray(TypedArray::from_u32s(&[0, u32::MAX])));
    roundtrip(Value::TypedArray(TypedArray::from_i32s(&[i32::MIN, i32::MAX])));
    roundtrip(Value::TypedArray(TypedArray::from_u64s(&[0, u64::MAX])));
    roundtrip(Value::TypedArray(TypedArray::from_i64s(&[i64::MIN, i64::MAX])));
    roundtrip(Value::TypedArray(TypedArray::from_f32s(&[-1.5, 0.25])));
    roundtrip(Value::TypedArray(TypedArray::from_f64s(&[std::f64::consts::PI])));
    roundtrip(Value::TypedArray(TypedArray::from_u16s(&[])));
}

#[test]
fn bool_bit_lists() {
    roundtrip(Value::BoolBitList(BoolBitList::from_bools(&[])));
    roundtrip(Value::BoolBitList(BoolBitList::from_bools(&[true])));
    let long: Vec<bool> = (0..77).map(|i| i % 3 == 0).collect();
    roundtrip(Value::BoolBitList(BoolBitList::from_bools(&long)));
}

#[test]
fn containers() {
    roundtrip(Value::List(vec![]));
    roundtrip(Value::List(vec![
        Value::Int(1),
        Value::text("two"),
        Value::Float(3.0),
        Value::Null,
    ]));
    roundtrip(Value::StrMap(vec![]));
    roundtrip(Value::StrMap(vec![
        ("a".into(), Value::Int(1)),
        ("b".into(), Value::List(vec![Value::Bool(true)])),
    ]));
    roundtrip(Value::Map(vec![
        (Value::Int(1), Value::text("one")),
        (Value::List(vec![Value::Int(2)]), Value::text("two")),
    ]));
    roundtrip(Value::Set(vec![Value::Int(1), Value::text("x")]));
    roundtrip(Value::Ext(ExtValue::new(0x7e, vec![1, 2, 3])));
}

#[test]
fn deep_nesting_roundtrips_inside_depth_budget() {
    let mut value: Value<'static> = Value::Int(0);
    for _ in 0..100 {
        value = Value::List(vec![value]);
    }
    roundtrip(value);
}

#[test]
fn promoted_int_list_decodes_as_typed_array() {
    let items: Vec<Value> = [5i64, -3, 900, 4].iter().map(|i| Value::Int(*i)).collect();
    let bytes = pack(&Value::List(items)).unwrap();
    match unpack(&bytes).unwrap() {
        Value::TypedArray(arr) => assert_eq!(arr.to_i16_vec(), Some(vec![5i16, -3, 900, 4])),
        other => panic!("expected typed array, got {other:?}"),
    }
}

#[test]
fn promoted_float_list_prefers_float32_when_exact() {
    let items: Vec<Value> = vec![
        Value::Float(1.5),
        Value::Float(-0.25),
        Value::Float(2.0),
        Value::Float(10.0),
    ];
    let mut cfg = Config::default();
    cfg.prefer_float32 = true;
    let bytes = pack_with_config(&Value::List(items.clone()), &cfg).unwrap();
    match unpack_with_config(&bytes, &cfg).unwrap() {
        Value::TypedArray(arr) => {
            assert_eq!(arr.to_f32_vec(), Some(vec![1.5f32, -0.25, 2.0, 10.0]))
        }
        other => panic!("expected f32 array, got {other:?}"),
    }

    let wide = pack(&Value::List(items)).unwrap();
    match unpack(&wide).unwrap() {
        Value::TypedArray(arr) => {
            assert_eq!(arr.to_f64_vec(), Some(vec![1.5f64, -0.25, 2.0, 10.0]))
        }
        other => panic!("expected f64 array, got {other:?}"),
    }
}

#[test]
fn bool_list_promotion_packs_bits() {
    let items: Vec<Value> = (0..12).map(|i| Value::Bool(i % 2 == 0)).collect();
    let bytes = pack(&Value::List(items)).unwrap();
    match unpack(&bytes).unwrap() {
        Value::BoolBitList(bits) => {
            assert_eq!(bits.len(), 12);
            assert_eq!(bits.get(0), Some(true));
            assert_eq!(bits.get(1), Some(false));
        }
        other => panic!("expected bool bit list, got {other:?}"),
    }
}

#[test]
fn lists_below_promotion_threshold_stay_generic() {
    let items: Vec<Value> = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
    let bytes = pack(&Value::List(items.clone())).unwrap();
    assert_eq!(unpack(&bytes).unwrap(), Value::List(items));
}

#[test]
fn mixed_sign_wide_list_falls_back_to_generic() {
    let items = vec![
        Value::Int(-1),
        Value::UInt(u64::MAX),
        Value::Int(7),
        Value::Int(8),
    ];
    let bytes = pack(&Value::List(items.clone())).unwrap();
    assert_eq!(unpack(&bytes).unwrap(), Value::List(items));
}

// ----------------------------------------------------------------------
// Zero-copy behavior
// ----------------------------------------------------------------------

/// Copies encoded bytes into an 8-aligned buffer so alignment-sensitive
/// assertions do not depend on allocator behavior.
struct AlignedBuf {
    storage: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    fn new(bytes: &[u8]) -> Self {
        let mut storage = vec![0u64; bytes.len().div_ceil(8)];
        // Safe reinterpretation: u8 has alignment 1 and the region is
        // exactly the storage allocation.
        let dst = unsafe {
            std::slice::from_raw_parts_mut(storage.as_mut_ptr() as *mut u8, storage.len() * 8)
        };
        dst[..bytes.len()].copy_from_slice(bytes);
        Self {
            storage,
            len: bytes.len(),
        }
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr() as *const u8, self.len) }
    }
}

#[test]
fn aligned_input_yields_borrowed_typed_views() {
    let value = Value::TypedArray(TypedArray::from_u16s(&[1000u16; 20]));
    let bytes = pack(&value).unwrap();
    let aligned = AlignedBuf::new(&bytes);
    let input = aligned.as_slice();
    match Decoder::new(input).unpack().unwrap() {
        Value::TypedArray(arr) => {
            assert!(arr.is_borrowed(), "aligned decode must not copy");
            let data_ptr = arr.data().as_ptr() as usize;
            let input_start = input.as_ptr() as usize;
            assert!(
                data_ptr >= input_start && data_ptr < input_start + input.len(),
                "view must point into the input buffer"
            );
            assert_eq!(arr.as_u16s(), Some(&[1000u16; 20][..]));
        }
        other => panic!("expected typed array, got {other:?}"),
    }
}

#[test]
fn misaligned_input_falls_back_to_copy() {
    let value = Value::TypedArray(TypedArray::from_u64s(&[9u64; 4]));
    let bytes = pack(&value).unwrap();
    // Shift the whole message by one byte inside an 8-aligned buffer, so
    // the data region lands on an odd address.
    let mut shifted = vec![0u8];
    shifted.extend_from_slice(&bytes);
    let aligned = AlignedBuf::new(&shifted);
    let input = &aligned.as_slice()[1..];
    match Decoder::new(input).unpack().unwrap() {
        Value::TypedArray(arr) => {
            assert!(!arr.is_borrowed(), "misaligned decode must copy");
            assert_eq!(arr.to_u64_vec(), Some(vec![9u64; 4]));
        }
        other => panic!("expected typed array, got {other:?}"),
    }
}

#[test]
fn decoded_strings_borrow_the_input() {
    let bytes = pack(&Value::text("borrowed")).unwrap();
    match unpack(&bytes).unwrap() {
        Value::Text(Cow::Borrowed(s)) => assert_eq!(s, "borrowed"),
        other => panic!("expected borrowed text, got {other:?}"),
    }
}

#[test]
fn into_owned_outlives_the_buffer() {
    let owned;
    {
        let bytes = pack(&Value::List(vec![
            Value::text("a"),
            Value::TypedArray(TypedArray::from_i32s(&[1, 2])),
        ]))
        .unwrap();
        owned = unpack(&bytes).unwrap().into_owned();
    }
    match owned {
        Value::List(items) => assert_eq!(items.len(), 2),
        other => panic!("expected list, got {other:?}"),
    }
}

// ----------------------------------------------------------------------
// Skip equivalence and resume
// ----------------------------------------------------------------------

#[test]
fn skip_lands_where_unpack_lands() {
    let values = vec![
        Value::Null,
        Value::Int(-70_000),
        Value::Float(1.25),
        Value::text("skip me"),
        Value::bytes(vec![1, 2, 3]),
        Value::List(vec![Value::Int(1), Value::List(vec![Value::text("x")])]),
        Value::StrMap(vec![("k".into(), Value::Set(vec![Value::Int(9)]))]),
        Value::TypedArray(TypedArray::from_f64s(&[0.5; 7])),
        Value::BigInt(BigInt::from(1) << 100),
        Value::DateTime(PackDateTime::new(77, false)),
        Value::Ext(ExtValue::new(0x44, vec![9; 20])),
    ];
    for value in values {
        let bytes = pack(&value).unwrap();
        let mut reader = Decoder::new(&bytes);
        reader.unpack().unwrap();
        let mut skipper = Decoder::new(&bytes);
        let consumed = skipper.skip_value().unwrap();
        assert_eq!(skipper.offset(), reader.offset(), "skip of {value:?}");
        assert_eq!(consumed, bytes.len());
        assert!(skipper.is_done());
    }
}

#[test]
fn multiple_values_decode_from_one_buffer() {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&pack(&Value::Int(1)).unwrap());
    buffer.extend_from_slice(&pack(&Value::text("two")).unwrap());
    buffer.extend_from_slice(&pack(&Value::Bool(true)).unwrap());
    let mut dec = Decoder::new(&buffer);
    assert_eq!(dec.unpack().unwrap(), Value::Int(1));
    assert_eq!(dec.unpack().unwrap(), Value::text("two"));
    assert!(!dec.is_done());
    assert_eq!(dec.unpack().unwrap(), Value::Bool(true));
    assert!(dec.is_done());
    let err = dec.unpack().unwrap_err();
    assert_eq!(err.code(), "truncated-input");
}
