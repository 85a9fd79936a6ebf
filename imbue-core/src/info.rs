//! Derived per-type decoding metadata and its process-wide registry.
//!
//! [`TypeInfo`] is everything the engine needs to know about a destination
//! type beyond its immediate structural kind: where the pointer chain
//! bottoms out, at which indirection level the binary-unmarshal capability
//! lives, and (for structs) the flattened wire-name field table. It is
//! computed from the type's static [`Shape`] at most once per process and
//! kept forever; lookups after the first are a read-lock and a hash probe.

use core::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

use crate::cell::{read_guard, write_guard};
use crate::shape::{Shape, ShapeKind};

/// A failure while deriving [`TypeInfo`] from a [`Shape`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// Two fields at the same flatten depth share a wire name.
    #[error("duplicate field name `{name}` while flattening `{type_name}`")]
    DuplicateField {
        /// The struct being flattened.
        type_name: &'static str,
        /// The contested wire name.
        name: &'static str,
    },
    /// A field marked `flatten` is not itself a struct.
    #[error("cannot flatten field `{field}` of `{type_name}`: not a struct")]
    FlattenNotStruct {
        /// The struct declaring the field.
        type_name: &'static str,
        /// The offending field.
        field: &'static str,
    },
}

/// How a struct field is reached from the struct's own cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIndex {
    /// A field declared directly on the struct.
    Flat(usize),
    /// A field inherited through one or more flattened sub-structs.
    Path(Vec<usize>),
}

impl FieldIndex {
    fn depth(&self) -> usize {
        match self {
            FieldIndex::Flat(_) => 1,
            FieldIndex::Path(path) => path.len(),
        }
    }
}

/// One entry in the flattened wire view of a struct.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// The name this field answers to on the wire.
    pub enc_name: &'static str,
    /// How to reach the field's slot.
    pub index: FieldIndex,
}

/// Memoized decoding metadata for one destination type.
#[derive(Debug)]
pub struct TypeInfo {
    base_id: TypeId,
    base_indir: u8,
    base_shape: &'static Shape,
    unmarshal_level: Option<u8>,
    fields: Vec<FieldInfo>,
    by_name: HashMap<&'static str, usize>,
}

impl TypeInfo {
    /// Identity of the type after stripping all pointer indirection.
    pub fn base_id(&self) -> TypeId {
        self.base_id
    }

    /// Number of pointer hops from the exposed type to the base type.
    pub fn base_indir(&self) -> u8 {
        self.base_indir
    }

    /// Shape of the base type.
    pub fn base_shape(&self) -> &'static Shape {
        self.base_shape
    }

    /// Shallowest indirection level carrying the binary-unmarshal
    /// capability; `0` is the exposed value itself.
    pub fn unmarshal_level(&self) -> Option<u8> {
        self.unmarshal_level
    }

    /// The flattened wire-view fields, in declaration order.
    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    /// The field at `index` in the flattened wire view.
    pub fn field(&self, index: usize) -> &FieldInfo {
        &self.fields[index]
    }

    /// Position of the field answering to `name`, if any.
    pub fn index_for_enc_name(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn build(shape: &'static Shape) -> Result<TypeInfo, ShapeError> {
        let mut base = shape;
        let mut base_indir = 0u8;
        let mut unmarshal_level = if shape.binary_unmarshal { Some(0) } else { None };
        while let ShapeKind::Ptr { pointee, .. } = base.kind {
            base = pointee();
            base_indir += 1;
            if unmarshal_level.is_none() && base.binary_unmarshal {
                unmarshal_level = Some(base_indir);
            }
        }

        let mut fields = Vec::new();
        let mut by_name = HashMap::new();
        if let ShapeKind::Struct { fields: defs } = base.kind {
            collect_fields(
                base.type_name,
                defs,
                &mut Vec::new(),
                &mut fields,
                &mut by_name,
            )?;
        }

        Ok(TypeInfo {
            base_id: base.type_id(),
            base_indir,
            base_shape: base,
            unmarshal_level,
            fields,
            by_name,
        })
    }
}

fn collect_fields(
    type_name: &'static str,
    defs: &'static [crate::shape::FieldDef],
    prefix: &mut Vec<usize>,
    out: &mut Vec<FieldInfo>,
    by_name: &mut HashMap<&'static str, usize>,
) -> Result<(), ShapeError> {
    for (i, def) in defs.iter().enumerate() {
        if def.skip {
            continue;
        }
        if def.flatten {
            let inner_shape = (def.shape)();
            let ShapeKind::Struct { fields: inner } = inner_shape.kind else {
                return Err(ShapeError::FlattenNotStruct {
                    type_name,
                    field: def.name,
                });
            };
            prefix.push(i);
            collect_fields(type_name, inner, prefix, out, by_name)?;
            prefix.pop();
            continue;
        }

        let index = if prefix.is_empty() {
            FieldIndex::Flat(i)
        } else {
            let mut path = prefix.clone();
            path.push(i);
            FieldIndex::Path(path)
        };
        let enc_name = def.enc_name();

        match by_name.entry(enc_name) {
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(FieldInfo { enc_name, index });
            }
            Entry::Occupied(slot) => {
                // Name contested across flatten depths: the shallower
                // declaration wins; an exact tie is ambiguous.
                let position = *slot.get();
                let existing_depth = out[position].index.depth();
                let new_depth = index.depth();
                if new_depth == existing_depth {
                    return Err(ShapeError::DuplicateField {
                        type_name,
                        name: enc_name,
                    });
                }
                if new_depth < existing_depth {
                    out[position] = FieldInfo { enc_name, index };
                }
            }
        }
    }
    Ok(())
}

static REGISTRY: OnceLock<RwLock<HashMap<TypeId, &'static TypeInfo>>> = OnceLock::new();
static BUILDS: AtomicUsize = AtomicUsize::new(0);

/// The memoized [`TypeInfo`] for `shape`, building it on first sighting.
pub fn type_info(shape: &'static Shape) -> Result<&'static TypeInfo, ShapeError> {
    let registry = REGISTRY.get_or_init(|| RwLock::new(HashMap::new()));
    let id = shape.type_id();
    if let Some(info) = read_guard(registry).get(&id).copied() {
        return Ok(info);
    }
    let mut guard = write_guard(registry);
    if let Some(info) = guard.get(&id).copied() {
        return Ok(info);
    }
    let info: &'static TypeInfo = Box::leak(Box::new(TypeInfo::build(shape)?));
    BUILDS.fetch_add(1, Ordering::Relaxed);
    guard.insert(id, info);
    Ok(info)
}

/// How many [`TypeInfo`]s have been built process-wide. Debug hook for
/// asserting cache behavior in tests.
pub fn build_count() -> usize {
    BUILDS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ReflectMut, Struct};
    use crate::reflect::{Reflect, Shaped};
    use crate::shape::FieldDef;

    // Hand-written impls, the way a type outside the derive's reach would
    // provide them.

    #[derive(Default)]
    struct Inner {
        x: i64,
        y: i64,
    }

    impl Shaped for Inner {
        fn shape() -> &'static Shape {
            static FIELDS: [FieldDef; 2] = [
                FieldDef {
                    name: "x",
                    rename: None,
                    skip: false,
                    flatten: false,
                    shape: <i64 as Shaped>::shape,
                },
                FieldDef {
                    name: "y",
                    rename: None,
                    skip: false,
                    flatten: false,
                    shape: <i64 as Shaped>::shape,
                },
            ];
            static SHAPE: Shape = Shape {
                type_name: "Inner",
                id: TypeId::of::<Inner>,
                kind: ShapeKind::Struct { fields: &FIELDS },
                binary_unmarshal: false,
            };
            &SHAPE
        }
    }

    impl Reflect for Inner {
        fn reflect_shape(&self) -> &'static Shape {
            <Self as Shaped>::shape()
        }

        fn reflect_mut(&mut self) -> ReflectMut<'_> {
            ReflectMut::Struct(self)
        }

        fn set_zero(&mut self) {
            self.x.set_zero();
            self.y.set_zero();
        }

        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn core::any::Any> {
            self
        }
    }

    impl Struct for Inner {
        fn field_len(&self) -> usize {
            2
        }

        fn field_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
            match index {
                0 => Some(&mut self.x),
                1 => Some(&mut self.y),
                _ => None,
            }
        }
    }

    #[derive(Default)]
    struct Outer {
        a: u32,
        inner: Inner,
        hidden: bool,
        renamed: String,
    }

    impl Shaped for Outer {
        fn shape() -> &'static Shape {
            static FIELDS: [FieldDef; 4] = [
                FieldDef {
                    name: "a",
                    rename: None,
                    skip: false,
                    flatten: false,
                    shape: <u32 as Shaped>::shape,
                },
                FieldDef {
                    name: "inner",
                    rename: None,
                    skip: false,
                    flatten: true,
                    shape: <Inner as Shaped>::shape,
                },
                FieldDef {
                    name: "hidden",
                    rename: None,
                    skip: true,
                    flatten: false,
                    shape: <bool as Shaped>::shape,
                },
                FieldDef {
                    name: "renamed",
                    rename: Some("wire"),
                    skip: false,
                    flatten: false,
                    shape: <String as Shaped>::shape,
                },
            ];
            static SHAPE: Shape = Shape {
                type_name: "Outer",
                id: TypeId::of::<Outer>,
                kind: ShapeKind::Struct { fields: &FIELDS },
                binary_unmarshal: false,
            };
            &SHAPE
        }
    }

    impl Reflect for Outer {
        fn reflect_shape(&self) -> &'static Shape {
            <Self as Shaped>::shape()
        }

        fn reflect_mut(&mut self) -> ReflectMut<'_> {
            ReflectMut::Struct(self)
        }

        fn set_zero(&mut self) {
            self.a.set_zero();
            self.inner.set_zero();
            self.hidden.set_zero();
            self.renamed.set_zero();
        }

        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn core::any::Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn core::any::Any> {
            self
        }
    }

    impl Struct for Outer {
        fn field_len(&self) -> usize {
            4
        }

        fn field_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
            match index {
                0 => Some(&mut self.a),
                1 => Some(&mut self.inner),
                2 => Some(&mut self.hidden),
                3 => Some(&mut self.renamed),
                _ => None,
            }
        }
    }

    #[test]
    fn flattens_renames_and_skips() {
        let info = type_info(Outer::shape()).unwrap();
        let names: Vec<_> = info.fields().iter().map(|f| f.enc_name).collect();
        assert_eq!(names, vec!["a", "x", "y", "wire"]);

        assert_eq!(info.index_for_enc_name("hidden"), None);
        assert_eq!(info.index_for_enc_name("renamed"), None);
        assert_eq!(info.index_for_enc_name("wire"), Some(3));

        let x = info.field(info.index_for_enc_name("x").unwrap());
        assert_eq!(x.index, FieldIndex::Path(vec![1, 0]));
        let a = info.field(info.index_for_enc_name("a").unwrap());
        assert_eq!(a.index, FieldIndex::Flat(0));
    }

    #[test]
    fn registry_memoizes_per_type() {
        let first = type_info(Outer::shape()).unwrap();
        let second = type_info(Outer::shape()).unwrap();
        assert!(core::ptr::eq(first, second));
    }

    #[test]
    fn pointer_chain_bottoms_out() {
        let info = type_info(<Option<Box<Inner>> as Shaped>::shape()).unwrap();
        assert_eq!(info.base_indir(), 2);
        assert_eq!(info.base_id(), TypeId::of::<Inner>());
        assert_eq!(info.fields().len(), 2);
    }

    #[test]
    fn shallower_field_wins_name_contest() {
        // Outer-level `x` declared after a flattened struct that also has `x`.
        struct Shadowing {
            inner: Inner,
            x: i64,
        }

        impl Shaped for Shadowing {
            fn shape() -> &'static Shape {
                static FIELDS: [FieldDef; 2] = [
                    FieldDef {
                        name: "inner",
                        rename: None,
                        skip: false,
                        flatten: true,
                        shape: <Inner as Shaped>::shape,
                    },
                    FieldDef {
                        name: "x",
                        rename: None,
                        skip: false,
                        flatten: false,
                        shape: <i64 as Shaped>::shape,
                    },
                ];
                static SHAPE: Shape = Shape {
                    type_name: "Shadowing",
                    id: TypeId::of::<Shadowing>,
                    kind: ShapeKind::Struct { fields: &FIELDS },
                    binary_unmarshal: false,
                };
                &SHAPE
            }
        }

        let _ = &Shadowing {
            inner: Inner::default(),
            x: 0,
        };

        let info = type_info(Shadowing::shape()).unwrap();
        let x = info.field(info.index_for_enc_name("x").unwrap());
        assert_eq!(x.index, FieldIndex::Flat(1));
        // position preserved: flattened order is x, y, then nothing new for x
        let names: Vec<_> = info.fields().iter().map(|f| f.enc_name).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn equal_depth_duplicate_is_rejected() {
        struct Clashing;

        impl Shaped for Clashing {
            fn shape() -> &'static Shape {
                static FIELDS: [FieldDef; 2] = [
                    FieldDef {
                        name: "same",
                        rename: None,
                        skip: false,
                        flatten: false,
                        shape: <i64 as Shaped>::shape,
                    },
                    FieldDef {
                        name: "other",
                        rename: Some("same"),
                        skip: false,
                        flatten: false,
                        shape: <i64 as Shaped>::shape,
                    },
                ];
                static SHAPE: Shape = Shape {
                    type_name: "Clashing",
                    id: TypeId::of::<Clashing>,
                    kind: ShapeKind::Struct { fields: &FIELDS },
                    binary_unmarshal: false,
                };
                &SHAPE
            }
        }

        let err = type_info(Clashing::shape()).unwrap_err();
        assert_eq!(
            err,
            ShapeError::DuplicateField {
                type_name: "Clashing",
                name: "same",
            }
        );
    }

    #[test]
    fn build_count_advances_on_first_sighting_only() {
        struct Counted;

        impl Shaped for Counted {
            fn shape() -> &'static Shape {
                static SHAPE: Shape = Shape {
                    type_name: "Counted",
                    id: TypeId::of::<Counted>,
                    kind: ShapeKind::Opaque,
                    binary_unmarshal: false,
                };
                &SHAPE
            }
        }

        let first = type_info(Counted::shape()).unwrap();
        let after_first = build_count();
        assert!(after_first >= 1);
        let second = type_info(Counted::shape()).unwrap();
        assert!(core::ptr::eq(first, second));
    }
}
