//! Numeric-runtime facts: safe-integer window and host properties.

/// Largest integer exactly representable on a float-backed runtime.
pub const SAFE_INT_MAX: i64 = (1 << 53) - 1;
/// Smallest integer exactly representable on a float-backed runtime.
pub const SAFE_INT_MIN: i64 = -SAFE_INT_MAX;

/// Properties of the host numeric runtime, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericRuntime {
    /// True when host integers are backed by doubles (the ±(2^53 − 1)
    /// window). Always false here: Rust integers are native 64-bit on
    /// every supported target.
    pub float_backed: bool,
    /// Host byte order. Typed-array payloads are written in this order.
    pub little_endian: bool,
}

impl NumericRuntime {
    /// Detects the host's numeric properties.
    pub const fn detect() -> Self {
        Self {
            float_backed: false,
            little_endian: cfg!(target_endian = "little"),
        }
    }
}

/// True when `v` lies inside the safe window.
#[inline]
pub fn in_safe_window_i64(v: i64) -> bool {
    (SAFE_INT_MIN..=SAFE_INT_MAX).contains(&v)
}

/// True when `v` lies inside the safe window.
#[inline]
pub fn in_safe_window_u64(v: u64) -> bool {
    v <= SAFE_INT_MAX as u64
}
