//! Binary buffer primitives shared by the typepack encoder and decoder.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::Writer;

use thiserror::Error;

/// Low-level buffer failures surfaced by the bounds-checked read methods.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("read past end of buffer")]
    EndOfBuffer,
    #[error("invalid utf-8 sequence")]
    InvalidUtf8,
}
