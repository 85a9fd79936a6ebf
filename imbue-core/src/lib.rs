#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Reflection primitives for the `imbue` decoder.
//!
//! This crate defines the destination-side model that the decoding engine in
//! `imbue-format` drives:
//!
//! - [`Reflect`] is the object-safe trait a destination value exposes. Its
//!   central operation, [`Reflect::reflect_mut`], produces a [`ReflectMut`]
//!   cursor: one variant per structural kind (scalar, string, byte buffer,
//!   pointer, struct, list, array, map, dynamic value, opaque).
//! - [`Shape`] is the static, per-type descriptor behind every `Reflect`
//!   impl, reachable without an instance through [`Shaped::shape`].
//! - [`TypeInfo`] is derived from a `Shape` once per type and memoized in a
//!   process-wide registry: pointer-chain depth, binary-unmarshal capability
//!   level, and the flattened wire-name field table for structs.
//! - [`Value`] is the dynamic catch-all used when the destination gives the
//!   stream no schema to decode against.
//!
//! Implementations of `Reflect` for the common standard-library types live
//! here; user structs derive it via `imbue-derive`.

mod cell;
mod impls;
mod info;
mod ops;
mod reflect;
mod shape;
mod value;

pub use cell::ShapeCell;
pub use info::{build_count, type_info, FieldIndex, FieldInfo, ShapeError, TypeInfo};
pub use ops::{Array, List, Map, Ptr, ReflectMut, Struct};
pub use reflect::{BinaryUnmarshal, Reflect, Shaped};
pub use shape::{FieldDef, Shape, ShapeKind};
pub use value::{ExtValue, Value};
