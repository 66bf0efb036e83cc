//! Prefix-driven decoder with zero-copy views.

use std::borrow::Cow;

use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use typepack_buffers::Reader;
use url::Url;

use crate::bitlist::BoolBitList;
use crate::config::{Config, IntInteropMode};
use crate::constants::*;
use crate::error::PackError;
use crate::runtime::{in_safe_window_i64, in_safe_window_u64};
use crate::value::{ExtValue, PackDateTime, TypedArray, TypedKind, Value};

/// One step of a shallow navigation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'s> {
    Key(&'s str),
    Index(usize),
}

/// Streaming decoder over a borrowed input buffer.
///
/// Decoded text, bytes, and typed arrays borrow the buffer, so values share
/// its lifetime; copy with [`Value::into_owned`] to outlive it. The cursor
/// advances past each decoded value, so sequential [`Decoder::unpack`] calls
/// resume where the previous one stopped.
#[derive(Debug)]
pub struct Decoder<'a> {
    r: Reader<'a>,
    cfg: Config,
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self::with_config(input, Config::default())
    }

    pub fn with_config(input: &'a [u8], cfg: Config) -> Self {
        Self {
            r: Reader::new(input),
            cfg,
            depth: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Installs a new input buffer, cursor at 0.
    pub fn reset(&mut self, input: &'a [u8]) {
        self.r.reset(input);
        self.depth = 0;
    }

    /// Current read offset into the input.
    pub fn offset(&self) -> usize {
        self.r.pos()
    }

    /// True when the input is fully consumed.
    pub fn is_done(&self) -> bool {
        self.r.is_done()
    }

    /// Decodes one value from the current offset and advances past it.
    pub fn unpack(&mut self) -> Result<Value<'a>, PackError> {
        self.depth = 0;
        self.read_any()
    }

    /// Advances past one value without materializing it, returning the
    /// number of bytes consumed.
    pub fn skip_value(&mut self) -> Result<usize, PackError> {
        self.depth = 0;
        self.skip_one()
    }

    /// Skips one value and requires it to have consumed the whole input.
    pub fn validate(&mut self) -> Result<(), PackError> {
        let consumed = self.skip_value()?;
        if !self.is_done() {
            return Err(PackError::TrailingBytes {
                offset: self.r.pos(),
                declared: self.r.pos() + self.r.remaining(),
                consumed,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Primitive reads with decode-grade errors
    // ------------------------------------------------------------------

    fn truncated(&self, needed: usize) -> PackError {
        PackError::TruncatedInput {
            offset: self.r.pos(),
            needed,
            remaining: self.r.remaining(),
        }
    }

    fn peek_byte(&self) -> Result<u8, PackError> {
        self.r.peek().map_err(|_| self.truncated(1))
    }

    fn u8(&mut self) -> Result<u8, PackError> {
        self.r.u8().map_err(|_| self.truncated(1))
    }

    fn i8(&mut self) -> Result<i8, PackError> {
        self.r.i8().map_err(|_| self.truncated(1))
    }

    fn u16(&mut self) -> Result<u16, PackError> {
        self.r.u16().map_err(|_| self.truncated(2))
    }

    fn i16(&mut self) -> Result<i16, PackError> {
        self.r.i16().map_err(|_| self.truncated(2))
    }

    fn u32(&mut self) -> Result<u32, PackError> {
        self.r.u32().map_err(|_| self.truncated(4))
    }

    fn i32(&mut self) -> Result<i32, PackError> {
        self.r.i32().map_err(|_| self.truncated(4))
    }

    fn u64(&mut self) -> Result<u64, PackError> {
        self.r.u64().map_err(|_| self.truncated(8))
    }

    fn i64(&mut self) -> Result<i64, PackError> {
        self.r.i64().map_err(|_| self.truncated(8))
    }

    fn f32(&mut self) -> Result<f32, PackError> {
        self.r.f32().map_err(|_| self.truncated(4))
    }

    fn f64(&mut self) -> Result<f64, PackError> {
        self.r.f64().map_err(|_| self.truncated(8))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PackError> {
        self.r.buf(n).map_err(|_| self.truncated(n))
    }

    fn skip_n(&mut self, n: usize) -> Result<(), PackError> {
        self.r.skip(n).map_err(|_| self.truncated(n))
    }

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

    // ------------------------------------------------------------------
    // Prefix loop
    // ------------------------------------------------------------------

    fn read_any(&mut self) -> Result<Value<'a>, PackError> {
        let offset = self.r.pos();
        let byte = self.u8()?;

        if byte <= POS_FIXINT_MAX {
            return Ok(Value::Int(byte as i64));
        }
        if byte >= NEG_FIXINT_BASE {
            return Ok(Value::Int(byte as i8 as i64));
        }

        match byte {
            0x80..=0x8f => self.read_map((byte & 0x0f) as usize),
            0x90..=0x9f => self.read_arr((byte & 0x0f) as usize),
            0xa0..=0xbf => self.read_str((byte & 0x1f) as usize),
            NIL => Ok(Value::Null),
            RESERVED => Err(PackError::UnknownPrefix {
                prefix: byte,
                offset,
            }),
            FALSE => Ok(Value::Bool(false)),
            TRUE => Ok(Value::Bool(true)),
            BIN8 => {
                let n = self.u8()? as usize;
                self.read_bin(n)
            }
            BIN16 => {
                let n = self.u16()? as usize;
                self.read_bin(n)
            }
            BIN32 => {
                let n = self.u32()? as usize;
                self.read_bin(n)
            }
            EXT8 => {
                let n = self.u8()? as usize;
                self.read_ext(n)
            }
            EXT16 => {
                let n = self.u16()? as usize;
                self.read_ext(n)
            }
            EXT32 => {
                let n = self.u32()? as usize;
                self.read_ext(n)
            }
            FLOAT32 => Ok(Value::Float(self.f32()? as f64)),
            FLOAT64 => Ok(Value::Float(self.f64()?)),
            UINT8 => Ok(Value::Int(self.u8()? as i64)),
            UINT16 => Ok(Value::Int(self.u16()? as i64)),
            UINT32 => Ok(Value::Int(self.u32()? as i64)),
            UINT64 => {
                let v = self.u64()?;
                Ok(self.coerce_u64(v))
            }
            INT8 => Ok(Value::Int(self.i8()? as i64)),
            INT16 => Ok(Value::Int(self.i16()? as i64)),
            INT32 => Ok(Value::Int(self.i32()? as i64)),
            INT64 => {
                let v = self.i64()?;
                Ok(self.coerce_i64(v))
            }
            FIXEXT1 => self.read_ext(1),
            FIXEXT2 => self.read_ext(2),
            FIXEXT4 => self.read_ext(4),
            FIXEXT8 => self.read_ext(8),
            FIXEXT16 => self.read_ext(16),
            STR8 => {
                let n = self.u8()? as usize;
                self.read_str(n)
            }
            STR16 => {
                let n = self.u16()? as usize;
                self.read_str(n)
            }
            STR32 => {
                let n = self.u32()? as usize;
                self.read_str(n)
            }
            ARR16 => {
                let n = self.u16()? as usize;
                self.read_arr(n)
            }
            ARR32 => {
                let n = self.u32()? as usize;
                self.read_arr(n)
            }
            MAP16 => {
                let n = self.u16()? as usize;
                self.read_map(n)
            }
            MAP32 => {
                let n = self.u32()? as usize;
                self.read_map(n)
            }
            _ => Err(PackError::UnknownPrefix {
                prefix: byte,
                offset,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Smart 64-bit coercion
    // ------------------------------------------------------------------

    fn coerce_u64(&self, v: u64) -> Value<'a> {
        match self.cfg.int_interop_mode {
            IntInteropMode::Off => {
                if v <= i64::MAX as u64 {
                    Value::Int(v as i64)
                } else {
                    Value::UInt(v)
                }
            }
            _ => {
                if in_safe_window_u64(v) {
                    Value::Int(v as i64)
                } else {
                    Value::BigInt(BigInt::from(v))
                }
            }
        }
    }

    fn coerce_i64(&self, v: i64) -> Value<'a> {
        match self.cfg.int_interop_mode {
            IntInteropMode::Off => Value::Int(v),
            _ => {
                if in_safe_window_i64(v) {
                    Value::Int(v)
                } else {
                    Value::BigInt(BigInt::from(v))
                }
            }
        }
    }

    fn coerce_big_int(&self, v: BigInt) -> Value<'a> {
        match self.cfg.int_interop_mode {
            IntInteropMode::Off => {
                if let Some(i) = v.to_i64() {
                    Value::Int(i)
                } else if let Some(u) = v.to_u64() {
                    Value::UInt(u)
                } else {
                    Value::BigInt(v)
                }
            }
            _ => match v.to_i64() {
                Some(i) if in_safe_window_i64(i) => Value::Int(i),
                _ => Value::BigInt(v),
            },
        }
    }

    // ------------------------------------------------------------------
    // Leaf readers
    // ------------------------------------------------------------------

    /// UTF-8 string read. Valid payloads come back as borrowed `&str`; the
    /// lossy path only runs under `allow_malformed_utf8`.
    fn read_str(&mut self, n: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(n, self.cfg.max_string_utf8_bytes, "string utf-8 bytes")?;
        let offset = self.r.pos();
        let bytes = self.take(n)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Value::Text(Cow::Borrowed(s))),
            Err(_) if self.cfg.allow_malformed_utf8 => Ok(Value::Text(Cow::Owned(
                String::from_utf8_lossy(bytes).into_owned(),
            ))),
            Err(_) => Err(PackError::InvalidUtf8 { offset }),
        }
    }

    fn read_key(&mut self) -> Result<Cow<'a, str>, PackError> {
        let byte = self.u8()?;
        let n = match byte {
            0xa0..=0xbf => (byte & 0x1f) as usize,
            STR8 => self.u8()? as usize,
            STR16 => self.u16()? as usize,
            STR32 => self.u32()? as usize,
            other => {
                return Err(PackError::TypeMismatch {
                    expected: "text key",
                    found: prefix_kind_name(other),
                })
            }
        };
        self.check_cap(n, self.cfg.max_string_utf8_bytes, "string utf-8 bytes")?;
        let offset = self.r.pos();
        let bytes = self.take(n)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(Cow::Borrowed(s)),
            Err(_) if self.cfg.allow_malformed_utf8 => {
                Ok(Cow::Owned(String::from_utf8_lossy(bytes).into_owned()))
            }
            Err(_) => Err(PackError::InvalidUtf8 { offset }),
        }
    }

    fn read_bin(&mut self, n: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(n, self.cfg.max_binary_bytes, "binary bytes")?;
        let bytes = self.take(n)?;
        Ok(Value::Bytes(Cow::Borrowed(bytes)))
    }

    fn read_arr(&mut self, n: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(n, self.cfg.max_array_length, "array length")?;
        self.enter()?;
        let mut items = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            items.push(self.read_any()?);
        }
        self.leave();
        Ok(Value::List(items))
    }

    /// Map read with the string-keyed fast path. Entries accumulate into a
    /// text-keyed map while every key prefix is a string; the first
    /// non-string key lifts the accumulated entries into a polymorphic map
    /// and reading continues there.
    fn read_map(&mut self, n: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(n, self.cfg.max_map_length, "map length")?;
        self.enter()?;
        if n == 0 {
            self.leave();
            return Ok(Value::StrMap(Vec::new()));
        }
        if is_str_prefix(self.peek_byte()?) {
            let mut entries: Vec<(Cow<'a, str>, Value<'a>)> = Vec::with_capacity(n.min(4096));
            for i in 0..n {
                if !is_str_prefix(self.peek_byte()?) {
                    let mut poly: Vec<(Value<'a>, Value<'a>)> = entries
                        .into_iter()
                        .map(|(k, v)| (Value::Text(k), v))
                        .collect();
                    for _ in i..n {
                        let key = self.read_any()?;
                        let val = self.read_any()?;
                        poly.push((key, val));
                    }
                    self.leave();
                    return Ok(Value::Map(poly));
                }
                let key = self.read_key()?;
                let val = self.read_any()?;
                entries.push((key, val));
            }
            self.leave();
            Ok(Value::StrMap(entries))
        } else {
            let mut poly = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                let key = self.read_any()?;
                let val = self.read_any()?;
                poly.push((key, val));
            }
            self.leave();
            Ok(Value::Map(poly))
        }
    }

    // ------------------------------------------------------------------
    // Ext readers
    // ------------------------------------------------------------------

    fn read_ext(&mut self, payload: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(payload, self.cfg.max_ext_payload_bytes, "ext payload bytes")?;
        let offset = self.r.pos();
        let ext_type = self.u8()?;
        match ext_type {
            ext::DATE_TIME => self.read_date_time(payload, offset),
            ext::DURATION => self.read_duration(payload, offset),
            ext::BIG_INT | ext::WIDE_INT => self.read_big_int(ext_type, payload, offset),
            ext::BOOL_LIST => self.read_bool_list(payload, offset),
            ext::URI => self.read_uri(payload, offset),
            ext::SET => self.read_set(payload),
            other => {
                if let Some(kind) = TypedKind::from_ext_type(other) {
                    self.read_typed_array(kind, payload, offset)
                } else {
                    let data = self.take(payload)?;
                    Ok(Value::Ext(ExtValue {
                        ext_type,
                        data: Cow::Borrowed(data),
                    }))
                }
            }
        }
    }

    fn read_date_time(&mut self, payload: usize, offset: usize) -> Result<Value<'a>, PackError> {
        if payload != 9 {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::DATE_TIME,
                offset,
                reason: "payload must be exactly 9 bytes",
            });
        }
        let flag = self.u8()?;
        if flag > 1 {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::DATE_TIME,
                offset,
                reason: "utc flag must be 0 or 1",
            });
        }
        let micros = self.i64()?;
        Ok(Value::DateTime(PackDateTime::new(micros, flag == 1)))
    }

    fn read_duration(&mut self, payload: usize, offset: usize) -> Result<Value<'a>, PackError> {
        if payload != 8 {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::DURATION,
                offset,
                reason: "payload must be exactly 8 bytes",
            });
        }
        Ok(Value::Duration(self.i64()?))
    }

    fn read_big_int(
        &mut self,
        ext_type: u8,
        payload: usize,
        offset: usize,
    ) -> Result<Value<'a>, PackError> {
        if payload < 1 {
            return Err(PackError::InvalidExtPayload {
                ext_type,
                offset,
                reason: "missing sign byte",
            });
        }
        let sign = self.u8()?;
        if sign > 1 {
            return Err(PackError::InvalidExtPayload {
                ext_type,
                offset,
                reason: "sign byte must be 0 or 1",
            });
        }
        let mag_len = payload - 1;
        self.check_cap(
            mag_len,
            self.cfg.max_big_int_magnitude_bytes,
            "bigint magnitude bytes",
        )?;
        let magnitude = self.take(mag_len)?;
        if magnitude.first() == Some(&0) {
            return Err(PackError::InvalidExtPayload {
                ext_type,
                offset,
                reason: "magnitude has a leading zero byte",
            });
        }
        if sign == 1 && magnitude.is_empty() {
            return Err(PackError::InvalidExtPayload {
                ext_type,
                offset,
                reason: "negative zero magnitude",
            });
        }
        let value = if magnitude.is_empty() {
            BigInt::zero()
        } else {
            let sign = if sign == 1 { Sign::Minus } else { Sign::Plus };
            BigInt::from_bytes_be(sign, magnitude)
        };
        Ok(self.coerce_big_int(value))
    }

    fn read_bool_list(&mut self, payload: usize, offset: usize) -> Result<Value<'a>, PackError> {
        if payload < 4 {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::BOOL_LIST,
                offset,
                reason: "payload shorter than count field",
            });
        }
        let count = self.u32()? as usize;
        self.check_cap(count, self.cfg.max_array_length, "array length")?;
        let packed = count.div_ceil(8);
        if payload != 4 + packed {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::BOOL_LIST,
                offset,
                reason: "packed byte count does not match element count",
            });
        }
        let bytes = self.take(packed)?;
        match BoolBitList::from_packed(bytes, count) {
            Some(bits) => Ok(Value::BoolBitList(bits)),
            None => Err(PackError::InvalidExtPayload {
                ext_type: ext::BOOL_LIST,
                offset,
                reason: "packed byte count does not match element count",
            }),
        }
    }

    fn read_uri(&mut self, payload: usize, offset: usize) -> Result<Value<'a>, PackError> {
        self.check_cap(payload, self.cfg.max_uri_utf8_bytes, "uri utf-8 bytes")?;
        let bytes = self.take(payload)?;
        let text = std::str::from_utf8(bytes).map_err(|_| PackError::InvalidExtPayload {
            ext_type: ext::URI,
            offset,
            reason: "uri is not valid utf-8",
        })?;
        let url = Url::parse(text).map_err(|_| PackError::InvalidExtPayload {
            ext_type: ext::URI,
            offset,
            reason: "invalid uri",
        })?;
        Ok(Value::Uri(url))
    }

    fn read_set(&mut self, payload: usize) -> Result<Value<'a>, PackError> {
        let start = self.r.pos();
        if payload < 4 {
            return Err(PackError::InvalidExtPayload {
                ext_type: ext::SET,
                offset: start,
                reason: "payload shorter than count field",
            });
        }
        let count = self.u32()? as usize;
        self.check_cap(count, self.cfg.max_array_length, "array length")?;
        self.enter()?;
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(self.read_any()?);
        }
        self.leave();
        let consumed = self.r.pos() - start;
        if consumed != payload {
            return Err(PackError::TrailingBytes {
                offset: start,
                declared: payload,
                consumed,
            });
        }
        Ok(Value::Set(items))
    }

    /// Typed-array read. When the payload data lands on an address aligned
    /// for the element type the storage is a borrowed view of the input;
    /// otherwise it is copied into a fresh allocation.
    fn read_typed_array(
        &mut self,
        kind: TypedKind,
        payload: usize,
        offset: usize,
    ) -> Result<Value<'a>, PackError> {
        if payload < 4 {
            return Err(PackError::InvalidExtPayload {
                ext_type: kind.ext_type(),
                offset,
                reason: "payload shorter than count field",
            });
        }
        let count = self.u32()? as usize;
        self.check_cap(count, self.cfg.max_array_length, "array length")?;
        let data_bytes =
            count
                .checked_mul(kind.elem_size())
                .ok_or(PackError::InvalidExtPayload {
                    ext_type: kind.ext_type(),
                    offset,
                    reason: "element count overflows",
                })?;
        let pad = payload
            .checked_sub(4 + data_bytes)
            .ok_or(PackError::InvalidExtPayload {
                ext_type: kind.ext_type(),
                offset,
                reason: "payload shorter than element data",
            })?;
        if pad > 7 {
            return Err(PackError::InvalidExtPayload {
                ext_type: kind.ext_type(),
                offset,
                reason: "padding exceeds 7 bytes",
            });
        }
        let pad_bytes = self.take(pad)?;
        if pad_bytes.iter().any(|b| *b != 0) {
            return Err(PackError::InvalidExtPayload {
                ext_type: kind.ext_type(),
                offset,
                reason: "padding bytes must be zero",
            });
        }
        let data = self.take(data_bytes)?;
        let aligned = (data.as_ptr() as usize) % kind.align() == 0;
        let storage = if aligned {
            Cow::Borrowed(data)
        } else {
            Cow::Owned(data.to_vec())
        };
        Ok(Value::TypedArray(TypedArray::from_wire(
            kind, count, storage,
        )))
    }

    // ------------------------------------------------------------------
    // Skipping
    // ------------------------------------------------------------------

    /// Lean walker: advances by reading only length fields.
    fn skip_one(&mut self) -> Result<usize, PackError> {
        let start = self.r.pos();
        let offset = start;
        let byte = self.u8()?;

        if byte <= POS_FIXINT_MAX || byte >= NEG_FIXINT_BASE {
            return Ok(1);
        }

        match byte {
            0x80..=0x8f => self.skip_map_entries((byte & 0x0f) as usize)?,
            0x90..=0x9f => self.skip_arr_items((byte & 0x0f) as usize)?,
            0xa0..=0xbf => self.skip_n((byte & 0x1f) as usize)?,
            NIL | FALSE | TRUE => {}
            RESERVED => {
                return Err(PackError::UnknownPrefix {
                    prefix: byte,
                    offset,
                })
            }
            BIN8 | STR8 => {
                let n = self.u8()? as usize;
                self.skip_n(n)?;
            }
            BIN16 | STR16 => {
                let n = self.u16()? as usize;
                self.skip_n(n)?;
            }
            BIN32 | STR32 => {
                let n = self.u32()? as usize;
                self.skip_n(n)?;
            }
            EXT8 => {
                let n = self.u8()? as usize;
                self.skip_n(n + 1)?;
            }
            EXT16 => {
                let n = self.u16()? as usize;
                self.skip_n(n + 1)?;
            }
            EXT32 => {
                let n = self.u32()? as usize;
                self.skip_n(n + 1)?;
            }
            FLOAT32 | UINT32 | INT32 => self.skip_n(4)?,
            FLOAT64 | UINT64 | INT64 => self.skip_n(8)?,
            UINT8 | INT8 => self.skip_n(1)?,
            UINT16 | INT16 => self.skip_n(2)?,
            FIXEXT1 => self.skip_n(2)?,
            FIXEXT2 => self.skip_n(3)?,
            FIXEXT4 => self.skip_n(5)?,
            FIXEXT8 => self.skip_n(9)?,
            FIXEXT16 => self.skip_n(17)?,
            ARR16 => {
                let n = self.u16()? as usize;
                self.skip_arr_items(n)?;
            }
            ARR32 => {
                let n = self.u32()? as usize;
                self.skip_arr_items(n)?;
            }
            MAP16 => {
                let n = self.u16()? as usize;
                self.skip_map_entries(n)?;
            }
            MAP32 => {
                let n = self.u32()? as usize;
                self.skip_map_entries(n)?;
            }
            other => {
                return Err(PackError::UnknownPrefix {
                    prefix: other,
                    offset,
                })
            }
        }
        Ok(self.r.pos() - start)
    }

    fn skip_arr_items(&mut self, n: usize) -> Result<(), PackError> {
        self.enter()?;
        for _ in 0..n {
            self.skip_one()?;
        }
        self.leave();
        Ok(())
    }

    fn skip_map_entries(&mut self, n: usize) -> Result<(), PackError> {
        self.enter()?;
        for _ in 0..n {
            self.skip_one()?;
            self.skip_one()?;
        }
        self.leave();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shallow navigation
    // ------------------------------------------------------------------

    /// Reads a map header at the cursor, returning the entry count.
    pub fn read_map_hdr(&mut self) -> Result<usize, PackError> {
        let byte = self.u8()?;
        if byte >> 4 == 0b1000 {
            return Ok((byte & 0x0f) as usize);
        }
        match byte {
            MAP16 => Ok(self.u16()? as usize),
            MAP32 => Ok(self.u32()? as usize),
            other => Err(PackError::TypeMismatch {
                expected: "map",
                found: prefix_kind_name(other),
            }),
        }
    }

    /// Reads an array header at the cursor, returning the element count.
    pub fn read_arr_hdr(&mut self) -> Result<usize, PackError> {
        let byte = self.u8()?;
        if byte >> 4 == 0b1001 {
            return Ok((byte & 0x0f) as usize);
        }
        match byte {
            ARR16 => Ok(self.u16()? as usize),
            ARR32 => Ok(self.u32()? as usize),
            other => Err(PackError::TypeMismatch {
                expected: "list",
                found: prefix_kind_name(other),
            }),
        }
    }

    /// Reads a string header at the cursor, returning the byte length.
    pub fn read_str_hdr(&mut self) -> Result<usize, PackError> {
        let byte = self.u8()?;
        if byte >> 5 == 0b101 {
            return Ok((byte & 0x1f) as usize);
        }
        match byte {
            STR8 => Ok(self.u8()? as usize),
            STR16 => Ok(self.u16()? as usize),
            STR32 => Ok(self.u32()? as usize),
            other => Err(PackError::TypeMismatch {
                expected: "text",
                found: prefix_kind_name(other),
            }),
        }
    }

    /// Positions the cursor on the value of `key` inside the map at the
    /// cursor, skipping other entries.
    pub fn find_key(&mut self, key: &str) -> Result<&mut Self, PackError> {
        let n = self.read_map_hdr()?;
        for _ in 0..n {
            if is_str_prefix(self.peek_byte()?) {
                let current = self.read_key()?;
                if current == key {
                    return Ok(self);
                }
            } else {
                self.skip_value()?;
            }
            self.skip_value()?;
        }
        Err(PackError::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// Positions the cursor on element `index` of the array at the cursor.
    pub fn find_index(&mut self, index: usize) -> Result<&mut Self, PackError> {
        let len = self.read_arr_hdr()?;
        if index >= len {
            return Err(PackError::IndexOutOfBounds { index, len });
        }
        for _ in 0..index {
            self.skip_value()?;
        }
        Ok(self)
    }

    /// Chained key/index navigation from the cursor.
    pub fn find_path(&mut self, path: &[PathSegment<'_>]) -> Result<&mut Self, PackError> {
        for segment in path {
            match segment {
                PathSegment::Key(key) => {
                    self.find_key(key)?;
                }
                PathSegment::Index(index) => {
                    self.find_index(*index)?;
                }
            }
        }
        Ok(self)
    }
}

/// Coarse prefix classification for error details.
fn prefix_kind_name(byte: u8) -> &'static str {
    match byte {
        0x00..=0x7f | 0xe0..=0xff | UINT8..=UINT64 | INT8..=INT64 => "int",
        0x80..=0x8f | MAP16 | MAP32 => "map",
        0x90..=0x9f | ARR16 | ARR32 => "list",
        0xa0..=0xbf | STR8 | STR16 | STR32 => "text",
        NIL => "null",
        RESERVED => "reserved",
        FALSE | TRUE => "bool",
        BIN8 | BIN16 | BIN32 => "bytes",
        EXT8 | EXT16 | EXT32 | FIXEXT1..=FIXEXT16 => "ext",
        FLOAT32 | FLOAT64 => "float",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixints_decode_directly() {
        assert_eq!(Decoder::new(&[0x2a]).unpack(), Ok(Value::Int(42)));
        assert_eq!(Decoder::new(&[0xff]).unpack(), Ok(Value::Int(-1)));
        assert_eq!(Decoder::new(&[0xe0]).unpack(), Ok(Value::Int(-32)));
    }

    #[test]
    fn reserved_prefix_fails_with_offset() {
        let err = Decoder::new(&[0xc1]).unpack().unwrap_err();
        assert_eq!(
            err,
            PackError::UnknownPrefix {
                prefix: 0xc1,
                offset: 0
            }
        );
    }

    #[test]
    fn truncated_string_reports_needed_and_remaining() {
        let err = Decoder::new(&[STR8, 0x02, 0x61]).unpack().unwrap_err();
        assert_eq!(
            err,
            PackError::TruncatedInput {
                offset: 2,
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn strings_decode_borrowed() {
        let data = [0xa5, b'H', b'e', b'l', b'l', b'o'];
        match Decoder::new(&data).unpack().unwrap() {
            Value::Text(Cow::Borrowed(s)) => assert_eq!(s, "Hello"),
            other => panic!("expected borrowed text, got {other:?}"),
        }
    }

    #[test]
    fn malformed_utf8_is_rejected_by_default() {
        let data = [0xa2, 0xff, 0xfe];
        let err = Decoder::new(&data).unpack().unwrap_err();
        assert_eq!(err, PackError::InvalidUtf8 { offset: 1 });

        let mut cfg = Config::default();
        cfg.allow_malformed_utf8 = true;
        let value = Decoder::with_config(&data, cfg).unpack().unwrap();
        match value {
            Value::Text(t) => assert_eq!(t, "\u{fffd}\u{fffd}"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn map_fast_path_keeps_text_keys() {
        let data = [0x81, 0xa1, b'a', 0x01];
        match Decoder::new(&data).unpack().unwrap() {
            Value::StrMap(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].0, "a");
                assert_eq!(entries[0].1, Value::Int(1));
            }
            other => panic!("expected str map, got {other:?}"),
        }
    }

    #[test]
    fn map_falls_back_mid_way_on_non_text_key() {
        // {"a": 1, 7: 2} — second key is an integer.
        let data = [0x82, 0xa1, b'a', 0x01, 0x07, 0x02];
        match Decoder::new(&data).unpack().unwrap() {
            Value::Map(entries) => {
                assert_eq!(entries[0], (Value::text("a"), Value::Int(1)));
                assert_eq!(entries[1], (Value::Int(7), Value::Int(2)));
            }
            other => panic!("expected polymorphic map, got {other:?}"),
        }
    }

    #[test]
    fn unregistered_ext_is_preserved_opaquely() {
        let data = [EXT8, 0x02, 0x7e, 0xde, 0xad];
        match Decoder::new(&data).unpack().unwrap() {
            Value::Ext(e) => {
                assert_eq!(e.ext_type, 0x7e);
                assert_eq!(&*e.data, &[0xde, 0xad]);
            }
            other => panic!("expected ext, got {other:?}"),
        }
    }

    #[test]
    fn fixext_envelope_reaches_registered_types() {
        // duration carried in a fixext8 envelope decodes the same as ext8
        let mut data = vec![FIXEXT8, ext::DURATION];
        data.extend_from_slice(&42i64.to_be_bytes());
        assert_eq!(Decoder::new(&data).unpack(), Ok(Value::Duration(42)));
    }

    #[test]
    fn date_time_length_is_strict() {
        let data = [EXT8, 0x08, ext::DATE_TIME, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = Decoder::new(&data).unpack().unwrap_err();
        assert!(matches!(err, PackError::InvalidExtPayload { ext_type, .. } if ext_type == ext::DATE_TIME));
    }

    #[test]
    fn sequential_unpacks_resume_at_offset() {
        let data = [0x01, 0xa1, b'x', 0xc3];
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.unpack(), Ok(Value::Int(1)));
        assert_eq!(dec.offset(), 1);
        assert_eq!(dec.unpack(), Ok(Value::text("x")));
        assert_eq!(dec.unpack(), Ok(Value::Bool(true)));
        assert!(dec.is_done());
    }

    #[test]
    fn skip_value_handles_every_family() {
        let data = [0x92, 0x81, 0xa1, b'a', 0x01, BIN8, 0x02, 0xaa, 0xbb];
        let mut dec = Decoder::new(&data);
        assert_eq!(dec.skip_value(), Ok(data.len()));
        assert!(dec.is_done());
    }

    #[test]
    fn validate_rejects_trailing_bytes() {
        let mut dec = Decoder::new(&[0x01, 0x02]);
        let err = dec.validate().unwrap_err();
        assert_eq!(err.code(), "trailing-bytes");
    }

    #[test]
    fn find_path_navigates_nested_values() {
        // {"a": [10, 20, {"b": 7}]}
        let data = [
            0x81, 0xa1, b'a', 0x93, 0x0a, 0x14, 0x81, 0xa1, b'b', 0x07,
        ];
        let mut dec = Decoder::new(&data);
        dec.find_path(&[
            PathSegment::Key("a"),
            PathSegment::Index(2),
            PathSegment::Key("b"),
        ])
        .unwrap();
        assert_eq!(dec.unpack(), Ok(Value::Int(7)));
    }

    #[test]
    fn find_key_reports_missing_keys() {
        let data = [0x81, 0xa1, b'a', 0x01];
        let mut dec = Decoder::new(&data);
        let err = dec.find_key("zz").unwrap_err();
        assert_eq!(err.code(), "key-not-found");
    }
}
