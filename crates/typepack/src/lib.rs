//! typepack — a compact binary codec for in-process value trees.
//!
//! Encodes a polymorphic [`Value`] tree (scalars, strings, binary blobs,
//! containers, dates, durations, arbitrary-precision integers, URIs, typed
//! numeric arrays) into a self-delimiting byte stream, and decodes it back
//! with bit-exact scalar fidelity. Typed numeric arrays decode as zero-copy
//! views into the input buffer whenever its alignment permits.
//!
//! # Example
//!
//! ```
//! use typepack::{pack, unpack, Value};
//!
//! let value = Value::List(vec![Value::Int(1), Value::text("two")]);
//! let bytes = pack(&value)?;
//! assert_eq!(unpack(&bytes)?, value);
//! # Ok::<(), typepack::PackError>(())
//! ```

mod bitlist;
mod config;
pub mod constants;
mod decoder;
mod encoder;
mod error;
mod json;
mod model;
mod runtime;
mod value;

pub use bitlist::BoolBitList;
pub use config::{Config, IntInteropMode};
pub use decoder::{Decoder, PathSegment};
pub use encoder::Encoder;
pub use error::PackError;
pub use model::{pack_model, unpack_model, ModelValue};
pub use runtime::{NumericRuntime, SAFE_INT_MAX, SAFE_INT_MIN};
pub use value::{ExtValue, PackDateTime, TypedArray, TypedKind, Value};

/// One-shot encode with the default configuration.
pub fn pack(value: &Value) -> Result<Vec<u8>, PackError> {
    Encoder::new().pack_to_vec(value)
}

/// One-shot encode with an explicit configuration.
pub fn pack_with_config(value: &Value, cfg: &Config) -> Result<Vec<u8>, PackError> {
    Encoder::with_config(cfg.clone()).pack_to_vec(value)
}

/// One-shot decode with the default configuration.
///
/// The returned value borrows `bytes`; use [`Value::into_owned`] to detach.
pub fn unpack(bytes: &[u8]) -> Result<Value<'_>, PackError> {
    Decoder::new(bytes).unpack()
}

/// One-shot decode with an explicit configuration.
pub fn unpack_with_config<'a>(bytes: &'a [u8], cfg: &Config) -> Result<Value<'a>, PackError> {
    Decoder::with_config(bytes, cfg.clone()).unpack()
}
