//! Model hook: user types travel through their text-keyed map form.

use std::borrow::Cow;

use crate::config::Config;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::PackError;
use crate::value::Value;

/// A user model that converts to and from a text-keyed map.
///
/// Encoding materializes [`ModelValue::to_map`] and encodes it like any
/// other map; decoding routes the decoded map through
/// [`ModelValue::from_map`]. This is the only extension point an end
/// application touches.
pub trait ModelValue: Sized {
    /// The text-keyed map form of the model.
    fn to_map(&self) -> Vec<(String, Value<'static>)>;

    /// Rebuilds the model from a decoded text-keyed map.
    fn from_map(map: &[(Cow<'_, str>, Value<'_>)]) -> Result<Self, PackError>;
}

/// Encodes a model through its map form.
pub fn pack_model<T: ModelValue>(model: &T, cfg: &Config) -> Result<Vec<u8>, PackError> {
    let entries: Vec<(Cow<'static, str>, Value<'static>)> = model
        .to_map()
        .into_iter()
        .map(|(k, v)| (Cow::Owned(k), v))
        .collect();
    let mut encoder = Encoder::with_config(cfg.clone());
    encoder.pack_to_vec(&Value::StrMap(entries))
}

/// Decodes a model, failing with a type mismatch when the buffer does not
/// hold a text-keyed map.
pub fn unpack_model<T: ModelValue>(bytes: &[u8], cfg: &Config) -> Result<T, PackError> {
    let mut decoder = Decoder::with_config(bytes, cfg.clone());
    match decoder.unpack()? {
        Value::StrMap(entries) => T::from_map(&entries),
        other => Err(PackError::TypeMismatch {
            expected: "text-keyed map",
            found: other.kind_name(),
        }),
    }
}
