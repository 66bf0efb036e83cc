//! The polymorphic value tree the codec encodes and decodes.

use std::borrow::Cow;
use std::mem::size_of;

use num_bigint::BigInt;
use url::Url;

use crate::bitlist::BoolBitList;
use crate::constants::ext;

/// Element kind of a typed numeric array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedKind {
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl TypedKind {
    /// Element width in bytes.
    pub fn elem_size(self) -> usize {
        match self {
            TypedKind::I8 => 1,
            TypedKind::U16 | TypedKind::I16 => 2,
            TypedKind::U32 | TypedKind::I32 | TypedKind::F32 => 4,
            TypedKind::U64 | TypedKind::I64 | TypedKind::F64 => 8,
        }
    }

    /// Alignment of the data region: `clamp(elem_size, 1, 8)`.
    pub fn align(self) -> usize {
        self.elem_size().clamp(1, 8)
    }

    /// The registry byte carried in the ext envelope.
    pub fn ext_type(self) -> u8 {
        match self {
            TypedKind::I8 => ext::INT8_LIST,
            TypedKind::U16 => ext::UINT16_LIST,
            TypedKind::I16 => ext::INT16_LIST,
            TypedKind::U32 => ext::UINT32_LIST,
            TypedKind::I32 => ext::INT32_LIST,
            TypedKind::U64 => ext::UINT64_LIST,
            TypedKind::I64 => ext::INT64_LIST,
            TypedKind::F32 => ext::FLOAT32_LIST,
            TypedKind::F64 => ext::FLOAT64_LIST,
        }
    }

    /// Reverse registry lookup.
    pub fn from_ext_type(byte: u8) -> Option<Self> {
        Some(match byte {
            ext::INT8_LIST => TypedKind::I8,
            ext::UINT16_LIST => TypedKind::U16,
            ext::INT16_LIST => TypedKind::I16,
            ext::UINT32_LIST => TypedKind::U32,
            ext::INT32_LIST => TypedKind::I32,
            ext::UINT64_LIST => TypedKind::U64,
            ext::INT64_LIST => TypedKind::I64,
            ext::FLOAT32_LIST => TypedKind::F32,
            ext::FLOAT64_LIST => TypedKind::F64,
            _ => return None,
        })
    }
}

/// A typed numeric array: element kind, count, and host-endian storage.
///
/// Decoded arrays borrow the input buffer when the payload happened to land
/// on an address aligned for the element type; otherwise the storage is an
/// owned copy. Equality compares content, not storage.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedArray<'a> {
    kind: TypedKind,
    len: usize,
    data: Cow<'a, [u8]>,
}

macro_rules! typed_array_kind {
    ($ctor:ident, $to_vec:ident, $as_slice:ident, $t:ty, $kind:expr) => {
        /// Builds an owned array from native values.
        pub fn $ctor(values: &[$t]) -> TypedArray<'static> {
            let mut data = Vec::with_capacity(values.len() * size_of::<$t>());
            for v in values {
                data.extend_from_slice(&v.to_ne_bytes());
            }
            TypedArray {
                kind: $kind,
                len: values.len(),
                data: Cow::Owned(data),
            }
        }

        /// Decodes the elements into an owned vector; `None` on kind
        /// mismatch.
        pub fn $to_vec(&self) -> Option<Vec<$t>> {
            if self.kind != $kind {
                return None;
            }
            Some(
                self.data
                    .chunks_exact(size_of::<$t>())
                    .map(|c| <$t>::from_ne_bytes(c.try_into().unwrap()))
                    .collect(),
            )
        }

        /// Reinterprets the storage as a native slice without copying.
        ///
        /// `None` on kind mismatch or when the storage address is not
        /// aligned for the element type.
        pub fn $as_slice(&self) -> Option<&[$t]> {
            if self.kind != $kind {
                return None;
            }
            // Storage is host-endian by construction, so an aligned
            // reinterpretation is exact.
            let (head, mid, tail) = unsafe { self.data.align_to::<$t>() };
            if head.is_empty() && tail.is_empty() {
                Some(mid)
            } else {
                None
            }
        }
    };
}

impl<'a> TypedArray<'a> {
    typed_array_kind!(from_i8s, to_i8_vec, as_i8s, i8, TypedKind::I8);
    typed_array_kind!(from_u16s, to_u16_vec, as_u16s, u16, TypedKind::U16);
    typed_array_kind!(from_i16s, to_i16_vec, as_i16s, i16, TypedKind::I16);
    typed_array_kind!(from_u32s, to_u32_vec, as_u32s, u32, TypedKind::U32);
    typed_array_kind!(from_i32s, to_i32_vec, as_i32s, i32, TypedKind::I32);
    typed_array_kind!(from_u64s, to_u64_vec, as_u64s, u64, TypedKind::U64);
    typed_array_kind!(from_i64s, to_i64_vec, as_i64s, i64, TypedKind::I64);
    typed_array_kind!(from_f32s, to_f32_vec, as_f32s, f32, TypedKind::F32);
    typed_array_kind!(from_f64s, to_f64_vec, as_f64s, f64, TypedKind::F64);

    /// Wraps wire storage. `data.len()` must equal `len * elem_size`.
    pub(crate) fn from_wire(kind: TypedKind, len: usize, data: Cow<'a, [u8]>) -> Self {
        debug_assert_eq!(data.len(), len * kind.elem_size());
        Self { kind, len, data }
    }

    /// Element kind.
    pub fn kind(&self) -> TypedKind {
        self.kind
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The host-endian element storage.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// True when the storage is a zero-copy view of the decode input.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Detaches the storage from any borrowed buffer.
    pub fn into_owned(self) -> TypedArray<'static> {
        TypedArray {
            kind: self.kind,
            len: self.len,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// An instant as microseconds since the Unix epoch plus a UTC flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackDateTime {
    pub epoch_micros: i64,
    pub utc: bool,
}

impl PackDateTime {
    pub fn new(epoch_micros: i64, utc: bool) -> Self {
        Self { epoch_micros, utc }
    }
}

/// An ext envelope whose registry byte the decoder does not recognize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtValue<'a> {
    /// The ext-type byte from the envelope.
    pub ext_type: u8,
    /// The raw payload bytes.
    pub data: Cow<'a, [u8]>,
}

impl<'a> ExtValue<'a> {
    pub fn new(ext_type: u8, data: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            ext_type,
            data: data.into(),
        }
    }

    pub fn into_owned(self) -> ExtValue<'static> {
        ExtValue {
            ext_type: self.ext_type,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// A value tree.
///
/// Decoded text, byte, and typed-array nodes borrow the input buffer; use
/// [`Value::into_owned`] when a value must outlive it. Maps come in two
/// shapes: [`Value::StrMap`] when every key is text (the common case, and
/// the shape the decoder's fast path produces) and [`Value::Map`] for
/// polymorphic keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    /// Host-wide signed integer.
    Int(i64),
    /// Unsigned wire integer above `i64::MAX`.
    UInt(u64),
    /// Arbitrary-precision integer.
    BigInt(BigInt),
    Float(f64),
    Bytes(Cow<'a, [u8]>),
    Text(Cow<'a, str>),
    /// Ordered, heterogeneous sequence.
    List(Vec<Value<'a>>),
    /// Insertion-ordered map with text keys.
    StrMap(Vec<(Cow<'a, str>, Value<'a>)>),
    /// Insertion-ordered map with polymorphic keys.
    Map(Vec<(Value<'a>, Value<'a>)>),
    /// Unordered collection, stored in encounter order.
    Set(Vec<Value<'a>>),
    DateTime(PackDateTime),
    /// Signed duration in microseconds.
    Duration(i64),
    Uri(Url),
    TypedArray(TypedArray<'a>),
    BoolBitList(BoolBitList),
    /// Unrecognized ext envelope, preserved opaquely.
    Ext(ExtValue<'a>),
}

impl<'a> Value<'a> {
    /// Short name of the runtime kind, used in error details.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::StrMap(_) => "map",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::DateTime(_) => "datetime",
            Value::Duration(_) => "duration",
            Value::Uri(_) => "uri",
            Value::TypedArray(_) => "typed-array",
            Value::BoolBitList(_) => "bool-bit-list",
            Value::Ext(_) => "ext",
        }
    }

    /// Owned text value.
    pub fn text(s: impl Into<String>) -> Value<'static> {
        Value::Text(Cow::Owned(s.into()))
    }

    /// Owned bytes value.
    pub fn bytes(b: impl Into<Vec<u8>>) -> Value<'static> {
        Value::Bytes(Cow::Owned(b.into()))
    }

    /// Detaches the tree from any borrowed decode buffer.
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Null => Value::Null,
            Value::Bool(b) => Value::Bool(b),
            Value::Int(i) => Value::Int(i),
            Value::UInt(u) => Value::UInt(u),
            Value::BigInt(b) => Value::BigInt(b),
            Value::Float(f) => Value::Float(f),
            Value::Bytes(b) => Value::Bytes(Cow::Owned(b.into_owned())),
            Value::Text(t) => Value::Text(Cow::Owned(t.into_owned())),
            Value::List(items) => Value::List(items.into_iter().map(Value::into_owned).collect()),
            Value::StrMap(entries) => Value::StrMap(
                entries
                    .into_iter()
                    .map(|(k, v)| (Cow::Owned(k.into_owned()), v.into_owned()))
                    .collect(),
            ),
            Value::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
            Value::Set(items) => Value::Set(items.into_iter().map(Value::into_owned).collect()),
            Value::DateTime(dt) => Value::DateTime(dt),
            Value::Duration(d) => Value::Duration(d),
            Value::Uri(u) => Value::Uri(u),
            Value::TypedArray(arr) => Value::TypedArray(arr.into_owned()),
            Value::BoolBitList(bits) => Value::BoolBitList(bits),
            Value::Ext(e) => Value::Ext(e.into_owned()),
        }
    }
}

impl From<bool> for Value<'static> {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value<'static> {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value<'static> {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value<'static> {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value<'static> {
    fn from(v: String) -> Self {
        Value::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Text(Cow::Borrowed(v))
    }
}

impl From<BigInt> for Value<'static> {
    fn from(v: BigInt) -> Self {
        Value::BigInt(v)
    }
}

impl<'a> From<Vec<Value<'a>>> for Value<'a> {
    fn from(v: Vec<Value<'a>>) -> Self {
        Value::List(v)
    }
}
