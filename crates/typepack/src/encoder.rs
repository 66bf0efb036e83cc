//! Value encoder with adaptive size-class selection.

use std::borrow::Cow;

use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use typepack_buffers::Writer;

use crate::bitlist::BoolBitList;
use crate::config::{Config, IntInteropMode, WIRE_MAX};
use crate::constants::*;
use crate::error::PackError;
use crate::runtime::{in_safe_window_i64, SAFE_INT_MAX};
use crate::value::{ExtValue, PackDateTime, TypedArray, TypedKind, Value};

/// Streaming value encoder over a growable byte buffer.
///
/// Reusable: [`Encoder::pack`] clears the cursor and encodes one value. The
/// returned slice borrows the internal buffer and is valid until the next
/// call; [`Encoder::pack_to_vec`] hands back an owned, exact-length copy
/// instead. After a failed encode the buffer contents are unspecified until
/// [`Encoder::reset`].
pub struct Encoder {
    w: Writer,
    cfg: Config,
    depth: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(cfg: Config) -> Self {
        Self {
            w: Writer::new(cfg.initial_capacity),
            cfg,
            depth: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Clears the write cursor without releasing the buffer.
    pub fn reset(&mut self) {
        self.w.reset();
        self.depth = 0;
    }

    /// Clears the cursor and installs a new configuration.
    pub fn reset_with_config(&mut self, cfg: Config) {
        self.w = Writer::new(cfg.initial_capacity);
        self.cfg = cfg;
        self.depth = 0;
    }

    /// Encodes one value, returning a slice into the internal buffer.
    pub fn pack(&mut self, value: &Value) -> Result<&[u8], PackError> {
        self.w.reset();
        self.depth = 0;
        self.write_any(value)?;
        Ok(self.w.as_slice())
    }

    /// Encodes one value into an owned buffer trimmed to its exact length.
    pub fn pack_to_vec(&mut self, value: &Value) -> Result<Vec<u8>, PackError> {
        self.pack(value)?;
        Ok(self.w.to_trimmed_vec())
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    pub(crate) fn write_any(&mut self, value: &Value) -> Result<(), PackError> {
        match value {
            Value::Null => {
                self.w.u8(NIL);
                Ok(())
            }
            Value::Bool(b) => {
                self.w.u8(if *b { TRUE } else { FALSE });
                Ok(())
            }
            Value::Int(i) => self.write_int(*i),
            Value::UInt(u) => self.write_uint(*u),
            Value::BigInt(b) => self.write_big_int_value(b),
            Value::Float(f) => {
                self.write_float(*f);
                Ok(())
            }
            Value::Text(t) => self.write_str(t),
            Value::Bytes(b) => self.write_bin(b),
            Value::TypedArray(arr) => self.write_typed_array(arr),
            Value::BoolBitList(bits) => self.write_bool_bit_list(bits),
            Value::DateTime(dt) => self.write_date_time(dt),
            Value::Duration(micros) => self.write_duration(*micros),
            Value::Uri(u) => self.write_uri(u.as_str()),
            Value::Set(items) => self.write_set(items),
            Value::StrMap(entries) => self.write_str_map(entries),
            Value::Map(entries) => self.write_map(entries),
            Value::List(items) => self.write_list(items),
            Value::Ext(e) => self.write_ext_value(e),
        }
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    fn write_int(&mut self, v: i64) -> Result<(), PackError> {
        if !in_safe_window_i64(v) {
            match self.cfg.int_interop_mode {
                IntInteropMode::RequireBigIntForWide => {
                    return Err(PackError::LimitExceeded {
                        limit: "safe integer window",
                        max: SAFE_INT_MAX as u64,
                        actual: v.unsigned_abs(),
                    });
                }
                IntInteropMode::PromoteWideToBigInt => {
                    return self.write_big_int(&BigInt::from(v), ext::BIG_INT);
                }
                IntInteropMode::Off => {}
            }
        }
        self.write_scalar_int(v);
        Ok(())
    }

    fn write_uint(&mut self, v: u64) -> Result<(), PackError> {
        if v > SAFE_INT_MAX as u64 {
            match self.cfg.int_interop_mode {
                IntInteropMode::RequireBigIntForWide => {
                    return Err(PackError::LimitExceeded {
                        limit: "safe integer window",
                        max: SAFE_INT_MAX as u64,
                        actual: v,
                    });
                }
                IntInteropMode::PromoteWideToBigInt => {
                    return self.write_big_int(&BigInt::from(v), ext::BIG_INT);
                }
                IntInteropMode::Off => {}
            }
        }
        self.write_scalar_uint(v);
        Ok(())
    }

    /// Tightest of negfixint / int8 / int16 / int32 / int64; non-negative
    /// values route through the unsigned families.
    fn write_scalar_int(&mut self, v: i64) {
        if v >= 0 {
            self.write_scalar_uint(v as u64);
        } else if v >= -0x20 {
            self.w.u8(v as i8 as u8);
        } else if v >= -0x80 {
            self.w.u8(INT8);
            self.w.i8(v as i8);
        } else if v >= -0x8000 {
            self.w.u8(INT16);
            self.w.i16(v as i16);
        } else if v >= -0x8000_0000 {
            self.w.u8(INT32);
            self.w.i32(v as i32);
        } else {
            self.w.u8(INT64);
            self.w.i64(v);
        }
    }

    /// Tightest of posfixint / uint8 / uint16 / uint32 / uint64.
    fn write_scalar_uint(&mut self, v: u64) {
        if v <= 0x7f {
            self.w.u8(v as u8);
        } else if v <= 0xff {
            self.w.u8(UINT8);
            self.w.u8(v as u8);
        } else if v <= 0xffff {
            self.w.u8u16(UINT16, v as u16);
        } else if v <= 0xffff_ffff {
            self.w.u8u32(UINT32, v as u32);
        } else {
            self.w.u8u64(UINT64, v);
        }
    }

    /// float32 when the narrow roundtrip is exact and preferred; NaN always
    /// stays float64 to preserve its payload bits.
    fn write_float(&mut self, v: f64) {
        if self.cfg.prefer_float32 && !v.is_nan() {
            let narrow = v as f32;
            if narrow as f64 == v {
                self.w.u8f32(FLOAT32, narrow);
                return;
            }
        }
        self.w.u8f64(FLOAT64, v);
    }

    // ------------------------------------------------------------------
    // Strings and binary
    // ------------------------------------------------------------------

    fn write_str(&mut self, s: &str) -> Result<(), PackError> {
        let n = s.len();
        self.check_cap(n, self.cfg.max_string_utf8_bytes, "string utf-8 bytes")?;
        self.write_str_hdr(n);
        self.w.utf8(s);
        Ok(())
    }

    fn write_str_hdr(&mut self, n: usize) {
        if n <= FIXSTR_MAX_LEN {
            self.w.u8(FIXSTR_BASE | n as u8);
        } else if n <= 0xff {
            self.w.u8(STR8);
            self.w.u8(n as u8);
        } else if n <= 0xffff {
            self.w.u8u16(STR16, n as u16);
        } else {
            self.w.u8u32(STR32, n as u32);
        }
    }

    fn write_bin(&mut self, bytes: &[u8]) -> Result<(), PackError> {
        self.check_cap(bytes.len(), self.cfg.max_binary_bytes, "binary bytes")?;
        self.write_bin_hdr(bytes.len());
        self.w.buf(bytes);
        Ok(())
    }

    fn write_bin_hdr(&mut self, n: usize) {
        if n <= 0xff {
            self.w.u8(BIN8);
            self.w.u8(n as u8);
        } else if n <= 0xffff {
            self.w.u8u16(BIN16, n as u16);
        } else {
            self.w.u8u32(BIN32, n as u32);
        }
    }

    // ------------------------------------------------------------------
    // Containers
    // ------------------------------------------------------------------

    fn write_arr_hdr(&mut self, n: usize) {
        if n <= FIXARR_MAX_LEN {
            self.w.u8(FIXARR_BASE | n as u8);
        } else if n <= 0xffff {
            self.w.u8u16(ARR16, n as u16);
        } else {
            self.w.u8u32(ARR32, n as u32);
        }
    }

    fn write_map_hdr(&mut self, n: usize) {
        if n <= FIXMAP_MAX_LEN {
            self.w.u8(FIXMAP_BASE | n as u8);
        } else if n <= 0xffff {
            self.w.u8u16(MAP16, n as u16);
        } else {
            self.w.u8u32(MAP32, n as u32);
        }
    }

    fn write_list(&mut self, items: &[Value]) -> Result<(), PackError> {
        self.check_cap(items.len(), self.cfg.max_array_length, "array length")?;
        self.enter()?;
        if !self.try_promote_list(items)? {
            self.write_arr_hdr(items.len());
            for item in items {
                self.write_any(item)?;
            }
        }
        self.leave();
        Ok(())
    }

    fn write_str_map(&mut self, entries: &[(Cow<'_, str>, Value)]) -> Result<(), PackError> {
        self.check_cap(entries.len(), self.cfg.max_map_length, "map length")?;
        self.enter()?;
        self.write_map_hdr(entries.len());
        if self.cfg.deterministic_maps {
            let mut order: Vec<usize> = (0..entries.len()).collect();
            order.sort_by(|&a, &b| entries[a].0.as_bytes().cmp(entries[b].0.as_bytes()));
            for idx in order {
                let (key, val) = &entries[idx];
                self.write_str(key)?;
                self.write_any(val)?;
            }
        } else {
            for (key, val) in entries {
                self.write_str(key)?;
                self.write_any(val)?;
            }
        }
        self.leave();
        Ok(())
    }

    fn write_map(&mut self, entries: &[(Value, Value)]) -> Result<(), PackError> {
        self.check_cap(entries.len(), self.cfg.max_map_length, "map length")?;
        self.enter()?;
        self.write_map_hdr(entries.len());
        let all_text = entries.iter().all(|(k, _)| matches!(k, Value::Text(_)));
        if self.cfg.deterministic_maps && all_text {
            let mut order: Vec<usize> = (0..entries.len()).collect();
            order.sort_by(|&a, &b| {
                let ka = match &entries[a].0 {
                    Value::Text(t) => t.as_bytes(),
                    _ => &[],
                };
                let kb = match &entries[b].0 {
                    Value::Text(t) => t.as_bytes(),
                    _ => &[],
                };
                ka.cmp(kb)
            });
            for idx in order {
                let (key, val) = &entries[idx];
                self.write_any(key)?;
                self.write_any(val)?;
            }
        } else {
            for (key, val) in entries {
                self.write_any(key)?;
                self.write_any(val)?;
            }
        }
        self.leave();
        Ok(())
    }

    fn write_set(&mut self, items: &[Value]) -> Result<(), PackError> {
        self.check_cap(items.len(), self.cfg.max_array_length, "array length")?;
        self.enter()?;
        // The payload length is unknown until the elements are written, so
        // the envelope is always ext 32 and the length slot patched after.
        self.w.u8(EXT32);
        let len_at = self.w.reserve(4);
        self.w.u8(ext::SET);
        let payload_start = self.w.len();
        self.w.u32(items.len() as u32);
        for item in items {
            self.write_any(item)?;
        }
        let payload = self.w.len() - payload_start;
        self.check_cap(payload, self.cfg.max_ext_payload_bytes, "ext payload bytes")?;
        self.check_cap(payload, WIRE_MAX, "ext payload bytes")?;
        self.w.patch_u32_at(len_at, payload as u32);
        self.leave();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Numeric-list promotion
    // ------------------------------------------------------------------

    /// Re-encodes a homogeneous numeric or boolean list as a typed array,
    /// bit list, or opaque byte blob. Returns false when the list must be
    /// emitted generically.
    fn try_promote_list(&mut self, items: &[Value]) -> Result<bool, PackError> {
        if items.is_empty() || items.len() < self.cfg.numeric_list_promotion_min_length {
            return Ok(false);
        }
        match items[0] {
            Value::Bool(_) => self.try_promote_bools(items),
            Value::Int(_) | Value::UInt(_) => self.try_promote_ints(items),
            Value::Float(_) => self.try_promote_floats(items),
            _ => Ok(false),
        }
    }

    fn try_promote_bools(&mut self, items: &[Value]) -> Result<bool, PackError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Bool(b) => values.push(*b),
                _ => return Ok(false),
            }
        }
        self.write_bool_bit_list(&BoolBitList::from_bools(&values))?;
        Ok(true)
    }

    fn try_promote_floats(&mut self, items: &[Value]) -> Result<bool, PackError> {
        let mut narrow_ok = self.cfg.prefer_float32;
        for item in items {
            match item {
                Value::Float(f) => {
                    if narrow_ok && (f.is_nan() || (*f as f32) as f64 != *f) {
                        narrow_ok = false;
                    }
                }
                _ => return Ok(false),
            }
        }
        if narrow_ok {
            self.write_typed_ext_hdr(TypedKind::F32, items.len())?;
            for item in items {
                if let Value::Float(f) = item {
                    self.w.buf(&(*f as f32).to_ne_bytes());
                }
            }
        } else {
            self.write_typed_ext_hdr(TypedKind::F64, items.len())?;
            for item in items {
                if let Value::Float(f) = item {
                    self.w.buf(&f.to_ne_bytes());
                }
            }
        }
        Ok(true)
    }

    /// Single pass with an optimistic opaque-bytes encoding: a bin header
    /// is reserved and elements copied in place while every value fits u8.
    /// The first wider element switches the pass to min/max accumulation
    /// only; afterwards the cursor is rewound and the list re-emitted under
    /// the typed kind the accumulated range selects.
    fn try_promote_ints(&mut self, items: &[Value]) -> Result<bool, PackError> {
        let promote = self.cfg.int_interop_mode == IntInteropMode::PromoteWideToBigInt;
        let require = self.cfg.int_interop_mode == IntInteropMode::RequireBigIntForWide;
        let mark = self.w.mark();
        let mut opaque = items.len() <= self.cfg.max_binary_bytes;
        if opaque {
            self.write_bin_hdr(items.len());
        }
        let mut min = i128::MAX;
        let mut max = i128::MIN;
        for item in items {
            let v: i128 = match item {
                Value::Int(i) => *i as i128,
                Value::UInt(u) => *u as i128,
                _ => {
                    self.w.rewind(mark);
                    return Ok(false);
                }
            };
            if v.unsigned_abs() > SAFE_INT_MAX as u128 {
                if require {
                    return Err(PackError::LimitExceeded {
                        limit: "safe integer window",
                        max: SAFE_INT_MAX as u64,
                        actual: v.unsigned_abs().min(u64::MAX as u128) as u64,
                    });
                }
                if promote {
                    // Each wide element must travel as an arbitrary-precision
                    // ext, which a typed array cannot carry.
                    self.w.rewind(mark);
                    return Ok(false);
                }
            }
            min = min.min(v);
            max = max.max(v);
            if opaque {
                if (0..=0xff).contains(&v) {
                    self.w.u8(v as u8);
                } else {
                    opaque = false;
                    self.w.rewind(mark);
                }
            }
        }
        if opaque {
            return Ok(true);
        }
        let Some(kind) = pick_int_kind(min, max) else {
            // Mixed sign with a magnitude above i64: no single typed kind
            // covers the range.
            self.w.rewind(mark);
            return Ok(false);
        };
        self.w.rewind(mark);
        self.write_typed_ext_hdr(kind, items.len())?;
        for item in items {
            let v: i128 = match item {
                Value::Int(i) => *i as i128,
                Value::UInt(u) => *u as i128,
                _ => unreachable!("homogeneity checked above"),
            };
            match kind {
                TypedKind::I8 => self.w.buf(&(v as i8).to_ne_bytes()),
                TypedKind::U16 => self.w.buf(&(v as u16).to_ne_bytes()),
                TypedKind::I16 => self.w.buf(&(v as i16).to_ne_bytes()),
                TypedKind::U32 => self.w.buf(&(v as u32).to_ne_bytes()),
                TypedKind::I32 => self.w.buf(&(v as i32).to_ne_bytes()),
                TypedKind::U64 => self.w.buf(&(v as u64).to_ne_bytes()),
                TypedKind::I64 => self.w.buf(&(v as i64).to_ne_bytes()),
                TypedKind::F32 | TypedKind::F64 => unreachable!("integer kinds only"),
            }
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Ext envelopes
    // ------------------------------------------------------------------

    /// Writes the smallest ext 8/16/32 header covering `payload` bytes,
    /// followed by the ext-type byte.
    fn write_ext_hdr(&mut self, ext_type: u8, payload: usize) -> Result<(), PackError> {
        self.check_cap(payload, self.cfg.max_ext_payload_bytes, "ext payload bytes")?;
        self.check_cap(payload, WIRE_MAX, "ext payload bytes")?;
        if payload <= 0xff {
            self.w.u8(EXT8);
            self.w.u8(payload as u8);
        } else if payload <= 0xffff {
            self.w.u8u16(EXT16, payload as u16);
        } else {
            self.w.u8u32(EXT32, payload as u32);
        }
        self.w.u8(ext_type);
        Ok(())
    }

    /// Writes a typed-array envelope: ext header, registry byte, u32
    /// element count, then the alignment padding. The caller writes
    /// `count * elem_size` host-endian data bytes immediately after.
    ///
    /// The padding makes the data region start at an offset that is a
    /// multiple of the element alignment, so it depends on the header
    /// width; each family is tried smallest-first with its own padding.
    fn write_typed_ext_hdr(&mut self, kind: TypedKind, count: usize) -> Result<(), PackError> {
        self.check_cap(count, self.cfg.max_array_length, "array length")?;
        let elem_size = kind.elem_size();
        let data_bytes = count
            .checked_mul(elem_size)
            .ok_or(PackError::LimitExceeded {
                limit: "ext payload bytes",
                max: WIRE_MAX as u64,
                actual: u64::MAX,
            })?;
        let align = kind.align();
        let families: [(u8, usize, usize); 3] = [
            (EXT8, 1, 0xff),
            (EXT16, 2, 0xffff),
            (EXT32, 4, WIRE_MAX),
        ];
        for (prefix, len_width, family_max) in families {
            let header_end = self.w.len() + 1 + len_width + 1 + 4;
            let pad = (align - header_end % align) % align;
            let payload = 4 + pad + data_bytes;
            if payload > family_max {
                continue;
            }
            self.check_cap(payload, self.cfg.max_ext_payload_bytes, "ext payload bytes")?;
            match prefix {
                EXT8 => {
                    self.w.u8(EXT8);
                    self.w.u8(payload as u8);
                }
                EXT16 => self.w.u8u16(EXT16, payload as u16),
                _ => self.w.u8u32(EXT32, payload as u32),
            }
            self.w.u8(kind.ext_type());
            self.w.u32(count as u32);
            self.w.pad_zero(pad);
            return Ok(());
        }
        Err(PackError::LimitExceeded {
            limit: "ext payload bytes",
            max: WIRE_MAX as u64,
            actual: data_bytes as u64,
        })
    }

    fn write_typed_array(&mut self, arr: &TypedArray) -> Result<(), PackError> {
        self.write_typed_ext_hdr(arr.kind(), arr.len())?;
        self.w.buf(arr.data());
        Ok(())
    }

    fn write_bool_bit_list(&mut self, bits: &BoolBitList) -> Result<(), PackError> {
        self.check_cap(bits.len(), self.cfg.max_array_length, "array length")?;
        self.write_ext_hdr(ext::BOOL_LIST, 4 + bits.as_bytes().len())?;
        self.w.u32(bits.len() as u32);
        self.w.buf(bits.as_bytes());
        Ok(())
    }

    fn write_date_time(&mut self, dt: &PackDateTime) -> Result<(), PackError> {
        self.write_ext_hdr(ext::DATE_TIME, 9)?;
        self.w.u8(dt.utc as u8);
        self.w.i64(dt.epoch_micros);
        Ok(())
    }

    fn write_duration(&mut self, micros: i64) -> Result<(), PackError> {
        self.write_ext_hdr(ext::DURATION, 8)?;
        self.w.i64(micros);
        Ok(())
    }

    fn write_uri(&mut self, uri: &str) -> Result<(), PackError> {
        self.check_cap(uri.len(), self.cfg.max_uri_utf8_bytes, "uri utf-8 bytes")?;
        self.write_ext_hdr(ext::URI, uri.len())?;
        self.w.utf8(uri);
        Ok(())
    }

    /// An explicit `BigInt` travels as the `wideInt` ext when interop is
    /// off and the value fits a 64-bit wire scalar range, so a matching
    /// decoder can surface it without arbitrary-precision arithmetic.
    fn write_big_int_value(&mut self, b: &BigInt) -> Result<(), PackError> {
        let ext_type = if self.cfg.int_interop_mode == IntInteropMode::Off
            && (b.to_i64().is_some() || b.to_u64().is_some())
        {
            ext::WIDE_INT
        } else {
            ext::BIG_INT
        };
        self.write_big_int(b, ext_type)
    }

    /// Sign byte followed by big-endian minimal magnitude; zero is a
    /// length-zero magnitude.
    fn write_big_int(&mut self, b: &BigInt, ext_type: u8) -> Result<(), PackError> {
        let (sign_byte, magnitude): (u8, Vec<u8>) = if b.is_zero() {
            (0, Vec::new())
        } else {
            let (sign, mag) = b.to_bytes_be();
            (u8::from(sign == Sign::Minus), mag)
        };
        self.check_cap(
            magnitude.len(),
            self.cfg.max_big_int_magnitude_bytes,
            "bigint magnitude bytes",
        )?;
        self.write_ext_hdr(ext_type, 1 + magnitude.len())?;
        self.w.u8(sign_byte);
        self.w.buf(&magnitude);
        Ok(())
    }

    fn write_ext_value(&mut self, e: &ExtValue) -> Result<(), PackError> {
        self.write_ext_hdr(e.ext_type, e.data.len())?;
        self.w.buf(&e.data);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn check_cap(&self, actual: usize, max: usize, limit: &'static str) -> Result<(), PackError> {
        if actual > max {
            Err(PackError::LimitExceeded {
                limit,
                max: max as u64,
                actual: actual as u64,
            })
        } else {
            Ok(())
        }
    }

    fn enter(&mut self) -> Result<(), PackError> {
        self.depth += 1;
        if self.depth > self.cfg.max_depth {
            return Err(PackError::MaxDepthExceeded {
                depth: self.depth,
                max: self.cfg.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

/// Smallest typed kind whose range covers `[min, max]`, preferring the
/// narrower and unsigned families.
fn pick_int_kind(min: i128, max: i128) -> Option<TypedKind> {
    if min >= i8::MIN as i128 && max <= i8::MAX as i128 {
        Some(TypedKind::I8)
    } else if min >= 0 && max <= u16::MAX as i128 {
        Some(TypedKind::U16)
    } else if min >= i16::MIN as i128 && max <= i16::MAX as i128 {
        Some(TypedKind::I16)
    } else if min >= 0 && max <= u32::MAX as i128 {
        Some(TypedKind::U32)
    } else if min >= i32::MIN as i128 && max <= i32::MAX as i128 {
        Some(TypedKind::I32)
    } else if min >= 0 && max <= u64::MAX as i128 {
        Some(TypedKind::U64)
    } else if min >= i64::MIN as i128 && max <= i64::MAX as i128 {
        Some(TypedKind::I64)
    } else {
        None
    }
}
