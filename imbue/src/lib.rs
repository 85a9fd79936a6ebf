#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Schema-driven, reflection-based decoding for self-describing binary
//! formats.
//!
//! This crate bundles the reflection primitives from `imbue-core` with the
//! `#[derive(Reflect)]` macro from `imbue-derive`. The decoding engine lives
//! in `imbue-format`, and each wire format ships as its own crate
//! (`imbue-format-msgpack`, `imbue-format-dense`).
//!
//! ```
//! use imbue::Reflect;
//!
//! #[derive(Reflect, Default)]
//! struct Login {
//!     user: String,
//!     #[imbue(rename = "pw")]
//!     password: String,
//! }
//! ```

pub use imbue_core::*;
pub use imbue_derive::Reflect;
