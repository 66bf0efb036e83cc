//! Codec configuration.

/// Policy for integers outside the ±(2^53 − 1) safe window.
///
/// The window matters when one side of an exchange runs on a float-backed
/// runtime; the mode decides whether such values travel as native wire
/// scalars, are promoted to arbitrary precision, or are rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntInteropMode {
    /// Wide integers use native 64-bit wire scalars and decode to host
    /// integers whenever they fit.
    #[default]
    Off,
    /// Integers outside the safe window travel as arbitrary-precision
    /// values and decode to `BigInt` on every host.
    PromoteWideToBigInt,
    /// Encoding a host integer outside the safe window fails; the caller
    /// must pass a `BigInt` explicitly.
    RequireBigIntForWide,
}

/// Immutable codec options, shared by encoder and decoder.
///
/// The per-kind caps default to the wire maximum (u32); lowering them is the
/// defense mechanism against untrusted input.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Encoder's initial buffer size in bytes.
    pub initial_capacity: usize,
    /// Encode doubles as float32 when the 32-bit roundtrip is exact.
    pub prefer_float32: bool,
    /// Decode invalid UTF-8 with replacement characters instead of failing.
    pub allow_malformed_utf8: bool,
    /// When every key in a map is text, emit entries in sorted order.
    pub deterministic_maps: bool,
    /// Hard cap on nesting depth, enforced on encode and decode alike.
    pub max_depth: usize,
    /// Wide-integer interop policy.
    pub int_interop_mode: IntInteropMode,
    /// Cap on the magnitude length of arbitrary-precision integers.
    pub max_big_int_magnitude_bytes: usize,
    /// Integer, float, and bool lists shorter than this are not promoted to
    /// typed arrays.
    pub numeric_list_promotion_min_length: usize,
    /// Cap on UTF-8 string payload bytes.
    pub max_string_utf8_bytes: usize,
    /// Cap on URI payload bytes.
    pub max_uri_utf8_bytes: usize,
    /// Cap on opaque binary payload bytes.
    pub max_binary_bytes: usize,
    /// Cap on list and set element counts.
    pub max_array_length: usize,
    /// Cap on map entry counts.
    pub max_map_length: usize,
    /// Cap on ext envelope payload bytes.
    pub max_ext_payload_bytes: usize,
}

pub(crate) const WIRE_MAX: usize = u32::MAX as usize;

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: 1024,
            prefer_float32: false,
            allow_malformed_utf8: false,
            deterministic_maps: false,
            max_depth: 512,
            int_interop_mode: IntInteropMode::Off,
            max_big_int_magnitude_bytes: WIRE_MAX,
            numeric_list_promotion_min_length: 4,
            max_string_utf8_bytes: WIRE_MAX,
            max_uri_utf8_bytes: WIRE_MAX,
            max_binary_bytes: WIRE_MAX,
            max_array_length: WIRE_MAX,
            max_map_length: WIRE_MAX,
            max_ext_payload_bytes: WIRE_MAX,
        }
    }
}
