//! Static type descriptors.
//!
//! A [`Shape`] is the compile-time half of reflection: it describes the
//! structural kind of a type and, for composites, how to reach the shapes of
//! its parts. Shapes are `&'static` and cheap to compare by the [`TypeId`]
//! they report, which makes them usable as cache keys for derived metadata.

use core::any::TypeId;

/// Static descriptor for a reflectable type.
#[derive(Debug)]
pub struct Shape {
    /// Short type name, for diagnostics only.
    pub type_name: &'static str,
    /// Thunk producing the stable identity of the described type.
    ///
    /// Stored as a function pointer because `TypeId::of` is not const.
    pub id: fn() -> TypeId,
    /// Structural kind of the type.
    pub kind: ShapeKind,
    /// Whether the type itself can absorb an opaque byte payload
    /// (see [`crate::BinaryUnmarshal`]).
    pub binary_unmarshal: bool,
}

impl Shape {
    /// The identity of the described type.
    pub fn type_id(&self) -> TypeId {
        (self.id)()
    }

    /// Whether this shape describes `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }
}

/// Structural classification of a [`Shape`].
///
/// Composite variants reference child shapes through thunks rather than
/// direct references so that shapes of recursive types can be built.
#[derive(Debug, Clone, Copy)]
pub enum ShapeKind {
    /// `bool`.
    Bool,
    /// `i8`.
    I8,
    /// `i16`.
    I16,
    /// `i32`.
    I32,
    /// `i64`.
    I64,
    /// `isize`.
    Isize,
    /// `u8`.
    U8,
    /// `u16`.
    U16,
    /// `u32`.
    U32,
    /// `u64`.
    U64,
    /// `usize`.
    Usize,
    /// `f32`.
    F32,
    /// `f64`.
    F64,
    /// An owned UTF-8 string.
    Str,
    /// An owned byte buffer (`Vec<u8>`), decoded as a unit.
    Bytes,
    /// One level of pointer indirection (`Option<T>`, `Box<T>`).
    Ptr {
        /// Shape of the pointee.
        pointee: fn() -> &'static Shape,
        /// Whether the pointer can be unset (`Option` is, `Box` is not).
        nullable: bool,
    },
    /// A struct with named fields.
    Struct {
        /// Declared fields, in declaration order, including skipped ones.
        fields: &'static [FieldDef],
    },
    /// A growable sequence (`Vec<T>` with a non-byte element).
    List {
        /// Shape of the element type.
        elem: fn() -> &'static Shape,
    },
    /// A fixed-length sequence (`[T; N]`).
    Array {
        /// Shape of the element type.
        elem: fn() -> &'static Shape,
        /// The fixed length.
        len: usize,
    },
    /// An associative container.
    Map {
        /// Shape of the key type.
        key: fn() -> &'static Shape,
        /// Shape of the value type.
        value: fn() -> &'static Shape,
    },
    /// The dynamic [`crate::Value`] slot: shape is chosen by the stream.
    Dynamic,
    /// A type the engine cannot decode structurally. Opaque destinations are
    /// only reachable through driver builtins, extensions, or the
    /// binary-unmarshal capability.
    Opaque,
}

impl ShapeKind {
    /// Human-readable kind name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            ShapeKind::Bool => "bool",
            ShapeKind::I8 => "i8",
            ShapeKind::I16 => "i16",
            ShapeKind::I32 => "i32",
            ShapeKind::I64 => "i64",
            ShapeKind::Isize => "isize",
            ShapeKind::U8 => "u8",
            ShapeKind::U16 => "u16",
            ShapeKind::U32 => "u32",
            ShapeKind::U64 => "u64",
            ShapeKind::Usize => "usize",
            ShapeKind::F32 => "f32",
            ShapeKind::F64 => "f64",
            ShapeKind::Str => "string",
            ShapeKind::Bytes => "bytes",
            ShapeKind::Ptr { .. } => "pointer",
            ShapeKind::Struct { .. } => "struct",
            ShapeKind::List { .. } => "list",
            ShapeKind::Array { .. } => "array",
            ShapeKind::Map { .. } => "map",
            ShapeKind::Dynamic => "dynamic",
            ShapeKind::Opaque => "opaque",
        }
    }
}

/// A declared struct field, as recorded in [`ShapeKind::Struct`].
///
/// The index of a `FieldDef` within its `fields` slice matches the index
/// accepted by [`crate::Struct::field_mut`], including fields marked `skip`.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Declared field name.
    pub name: &'static str,
    /// Wire-name override from a `rename` attribute.
    pub rename: Option<&'static str>,
    /// Excluded from the wire view entirely.
    pub skip: bool,
    /// Inline this field's own fields into the parent's wire view.
    pub flatten: bool,
    /// Shape of the field's type.
    pub shape: fn() -> &'static Shape,
}

impl FieldDef {
    /// The name this field carries on the wire.
    pub fn enc_name(&self) -> &'static str {
        self.rename.unwrap_or(self.name)
    }
}
