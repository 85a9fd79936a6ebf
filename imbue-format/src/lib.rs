#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(unused_macros)]

//! Driver contract, byte sources, and the plan-cached decoding engine.
//!
//! This crate is format-agnostic: it owns the recursive [`Decoder`] and the
//! [`DecDriver`] contract, while the concrete wire formats live in the
//! `imbue-format-*` crates. A format crate supplies a driver plus a handle
//! (policy + extension registry); the engine here does everything else:
//! destination-kind dispatch, per-type plan caching, nil and length
//! reconciliation, and schema-less decoding into [`imbue_core::Value`].

/// Trace-level logging macro that forwards to `tracing::trace!` when the
/// `tracing` feature is enabled.
///
/// When the `tracing` feature is disabled, this expands to nothing.
#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($arg:tt)*) => {
        ::tracing::trace!($($arg)*)
    };
}

/// Trace-level logging macro (no-op when `tracing` feature is disabled).
#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Debug-level logging macro that forwards to `tracing::debug!` when the
/// `tracing` feature is enabled.
///
/// When the `tracing` feature is disabled, this expands to nothing.
#[cfg(feature = "tracing")]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {
        ::tracing::debug!($($arg)*)
    };
}

/// Debug-level logging macro (no-op when `tracing` feature is disabled).
#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[allow(unused_imports)]
pub(crate) use debug;
#[allow(unused_imports)]
pub(crate) use trace;

mod decoder;
mod driver;
mod error;
mod handle;
mod reader;

pub use decoder::Decoder;
pub use driver::{
    check_float32, check_int_fits, check_uint_fits, int_to_uint, uint_to_int, ContainerShape,
    DecDriver, EncodedType, Naked,
};
pub use error::{DecodeError, RegisterError};
pub use handle::{DecodeOptions, ExtEntry, ExtRegistry, Handle};
pub use reader::{DecReader, IoReader, SliceReader};
