//! `Reflect`/`Shaped` impls for the standard library types the decoder
//! understands out of the box.

use core::any::{Any, TypeId};
use core::hash::Hash;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::cell::ShapeCell;
use crate::ops::{Array, List, Map, Ptr, ReflectMut};
use crate::reflect::{Reflect, Shaped};
use crate::shape::{Shape, ShapeKind};

macro_rules! impl_any_upcasts {
    () => {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    };
}

macro_rules! impl_scalar_reflect {
    ($($ty:ty => $kind:ident, $zero:expr;)*) => {$(
        impl Shaped for $ty {
            fn shape() -> &'static Shape {
                static SHAPE: Shape = Shape {
                    type_name: stringify!($ty),
                    id: TypeId::of::<$ty>,
                    kind: ShapeKind::$kind,
                    binary_unmarshal: false,
                };
                &SHAPE
            }
        }

        impl Reflect for $ty {
            fn reflect_shape(&self) -> &'static Shape {
                <Self as Shaped>::shape()
            }

            fn reflect_mut(&mut self) -> ReflectMut<'_> {
                ReflectMut::$kind(self)
            }

            fn set_zero(&mut self) {
                *self = $zero;
            }

            impl_any_upcasts!();
        }
    )*};
}

impl_scalar_reflect! {
    bool => Bool, false;
    i8 => I8, 0;
    i16 => I16, 0;
    i32 => I32, 0;
    i64 => I64, 0;
    isize => Isize, 0;
    u8 => U8, 0;
    u16 => U16, 0;
    u32 => U32, 0;
    u64 => U64, 0;
    usize => Usize, 0;
    f32 => F32, 0.0;
    f64 => F64, 0.0;
}

impl Shaped for String {
    fn shape() -> &'static Shape {
        static SHAPE: Shape = Shape {
            type_name: "String",
            id: TypeId::of::<String>,
            kind: ShapeKind::Str,
            binary_unmarshal: false,
        };
        &SHAPE
    }
}

impl Reflect for String {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Str(self)
    }

    fn set_zero(&mut self) {
        self.clear();
    }

    impl_any_upcasts!();
}

// `Vec<u8>` is a byte buffer, every other `Vec<T>` is a list. The two cases
// share one impl, discriminated by element `TypeId`.
impl<T: Reflect + Shaped + Default> Shaped for Vec<T> {
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<Vec<T>>(|| {
            let kind = if TypeId::of::<T>() == TypeId::of::<u8>() {
                ShapeKind::Bytes
            } else {
                ShapeKind::List { elem: T::shape }
            };
            Shape {
                type_name: "Vec",
                id: TypeId::of::<Vec<T>>,
                kind,
                binary_unmarshal: false,
            }
        })
    }
}

impl<T: Reflect + Shaped + Default> Reflect for Vec<T> {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        if TypeId::of::<T>() == TypeId::of::<u8>() {
            match (self as &mut dyn Any).downcast_mut::<Vec<u8>>() {
                Some(bytes) => ReflectMut::Bytes(bytes),
                None => unreachable!("element type verified as u8"),
            }
        } else {
            ReflectMut::List(self)
        }
    }

    fn set_zero(&mut self) {
        self.clear();
    }

    impl_any_upcasts!();
}

impl<T: Reflect + Shaped + Default> List for Vec<T> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.as_mut_slice()
            .get_mut(index)
            .map(|elem| elem as &mut dyn Reflect)
    }

    fn grow_to(&mut self, len: usize) {
        if len > Vec::len(self) {
            self.resize_with(len, T::default);
        }
    }
}

impl<T: Reflect + Shaped, const N: usize> Shaped for [T; N] {
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<[T; N]>(|| Shape {
            type_name: "array",
            id: TypeId::of::<[T; N]>,
            kind: ShapeKind::Array {
                elem: T::shape,
                len: N,
            },
            binary_unmarshal: false,
        })
    }
}

impl<T: Reflect + Shaped, const N: usize> Reflect for [T; N] {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Array(self)
    }

    fn set_zero(&mut self) {
        for elem in self.iter_mut() {
            elem.set_zero();
        }
    }

    impl_any_upcasts!();
}

impl<T: Reflect + Shaped, const N: usize> Array for [T; N] {
    fn len(&self) -> usize {
        N
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut dyn Reflect> {
        self.as_mut_slice()
            .get_mut(index)
            .map(|elem| elem as &mut dyn Reflect)
    }
}

impl<T: Reflect + Shaped + Default> Shaped for Option<T> {
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<Option<T>>(|| Shape {
            type_name: "Option",
            id: TypeId::of::<Option<T>>,
            kind: ShapeKind::Ptr {
                pointee: T::shape,
                nullable: true,
            },
            binary_unmarshal: false,
        })
    }
}

impl<T: Reflect + Shaped + Default> Reflect for Option<T> {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Ptr(self)
    }

    fn set_zero(&mut self) {
        *self = None;
    }

    impl_any_upcasts!();
}

impl<T: Reflect + Shaped + Default> Ptr for Option<T> {
    fn is_unset(&self) -> bool {
        self.is_none()
    }

    fn ensure_pointee(&mut self) -> &mut dyn Reflect {
        self.get_or_insert_with(T::default)
    }
}

impl<T: Reflect + Shaped> Shaped for Box<T> {
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<Box<T>>(|| Shape {
            type_name: "Box",
            id: TypeId::of::<Box<T>>,
            kind: ShapeKind::Ptr {
                pointee: T::shape,
                nullable: false,
            },
            binary_unmarshal: false,
        })
    }
}

impl<T: Reflect + Shaped> Reflect for Box<T> {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Ptr(self)
    }

    fn set_zero(&mut self) {
        (**self).set_zero();
    }

    impl_any_upcasts!();
}

impl<T: Reflect + Shaped> Ptr for Box<T> {
    fn is_unset(&self) -> bool {
        false
    }

    fn ensure_pointee(&mut self) -> &mut dyn Reflect {
        &mut **self
    }
}

impl<K, V> Shaped for HashMap<K, V>
where
    K: Reflect + Shaped + Default + Eq + Hash,
    V: Reflect + Shaped + Default,
{
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<HashMap<K, V>>(|| Shape {
            type_name: "HashMap",
            id: TypeId::of::<HashMap<K, V>>,
            kind: ShapeKind::Map {
                key: K::shape,
                value: V::shape,
            },
            binary_unmarshal: false,
        })
    }
}

impl<K, V> Reflect for HashMap<K, V>
where
    K: Reflect + Shaped + Default + Eq + Hash,
    V: Reflect + Shaped + Default,
{
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Map(self)
    }

    fn set_zero(&mut self) {
        self.clear();
    }

    impl_any_upcasts!();
}

impl<K, V> Map for HashMap<K, V>
where
    K: Reflect + Shaped + Default + Eq + Hash,
    V: Reflect + Shaped + Default,
{
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn new_key(&self) -> Box<dyn Reflect> {
        Box::new(K::default())
    }

    fn entry_mut(&mut self, key: Box<dyn Reflect>) -> Option<&mut dyn Reflect> {
        let key = key.take::<K>().ok()?;
        Some(self.entry(key).or_insert_with(V::default))
    }
}

impl<K, V> Shaped for BTreeMap<K, V>
where
    K: Reflect + Shaped + Default + Ord,
    V: Reflect + Shaped + Default,
{
    fn shape() -> &'static Shape {
        static CELL: ShapeCell = ShapeCell::new();
        CELL.get_or_init::<BTreeMap<K, V>>(|| Shape {
            type_name: "BTreeMap",
            id: TypeId::of::<BTreeMap<K, V>>,
            kind: ShapeKind::Map {
                key: K::shape,
                value: V::shape,
            },
            binary_unmarshal: false,
        })
    }
}

impl<K, V> Reflect for BTreeMap<K, V>
where
    K: Reflect + Shaped + Default + Ord,
    V: Reflect + Shaped + Default,
{
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Map(self)
    }

    fn set_zero(&mut self) {
        self.clear();
    }

    impl_any_upcasts!();
}

impl<K, V> Map for BTreeMap<K, V>
where
    K: Reflect + Shaped + Default + Ord,
    V: Reflect + Shaped + Default,
{
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn new_key(&self) -> Box<dyn Reflect> {
        Box::new(K::default())
    }

    fn entry_mut(&mut self, key: Box<dyn Reflect>) -> Option<&mut dyn Reflect> {
        let key = key.take::<K>().ok()?;
        Some(self.entry(key).or_insert_with(V::default))
    }
}

// Opaque: decodable only through a driver builtin, a registered extension,
// or the binary-unmarshal capability.
impl Shaped for Duration {
    fn shape() -> &'static Shape {
        static SHAPE: Shape = Shape {
            type_name: "Duration",
            id: TypeId::of::<Duration>,
            kind: ShapeKind::Opaque,
            binary_unmarshal: false,
        };
        &SHAPE
    }
}

impl Reflect for Duration {
    fn reflect_shape(&self) -> &'static Shape {
        <Self as Shaped>::shape()
    }

    fn reflect_mut(&mut self) -> ReflectMut<'_> {
        ReflectMut::Opaque(self)
    }

    fn set_zero(&mut self) {
        *self = Duration::ZERO;
    }

    impl_any_upcasts!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_of_bytes_is_bytes() {
        let mut v: Vec<u8> = vec![1, 2, 3];
        assert!(matches!(v.reflect_mut(), ReflectMut::Bytes(_)));
        assert!(matches!(<Vec<u8> as Shaped>::shape().kind, ShapeKind::Bytes));
    }

    #[test]
    fn vec_of_ints_is_list() {
        let mut v: Vec<i32> = vec![1, 2, 3];
        assert!(matches!(v.reflect_mut(), ReflectMut::List(_)));
        assert!(matches!(
            <Vec<i32> as Shaped>::shape().kind,
            ShapeKind::List { .. }
        ));
    }

    #[test]
    fn generic_shapes_are_per_instantiation() {
        let a = <Vec<i32> as Shaped>::shape();
        let b = <Vec<i64> as Shaped>::shape();
        assert_ne!(a.type_id(), b.type_id());
        // repeated lookups hit the same leaked shape
        assert!(core::ptr::eq(a, <Vec<i32> as Shaped>::shape()));
    }

    #[test]
    fn option_ensure_allocates_once() {
        let mut opt: Option<i32> = None;
        assert!(Ptr::is_unset(&opt));
        opt.ensure_pointee();
        assert_eq!(opt, Some(0));
        opt = Some(7);
        opt.ensure_pointee();
        assert_eq!(opt, Some(7));
    }

    #[test]
    fn map_entry_reuses_existing_slot() {
        let mut map: HashMap<String, i64> = HashMap::new();
        map.insert("k".into(), 42);
        let slot = map.entry_mut(Box::new(String::from("k"))).unwrap();
        assert_eq!(*slot.downcast_ref::<i64>().unwrap(), 42);
        let fresh = map.entry_mut(Box::new(String::from("new"))).unwrap();
        assert_eq!(*fresh.downcast_ref::<i64>().unwrap(), 0);
    }

    #[test]
    fn map_entry_rejects_foreign_key_type() {
        let mut map: HashMap<String, i64> = HashMap::new();
        assert!(map.entry_mut(Box::new(0u32)).is_none());
    }

    #[test]
    fn set_zero_clears_containers() {
        let mut v = vec![1i64, 2, 3];
        Reflect::set_zero(&mut v);
        assert!(v.is_empty());

        let mut arr = [1i64, 2];
        Reflect::set_zero(&mut arr);
        assert_eq!(arr, [0, 0]);

        let mut boxed = Box::new(9i32);
        Reflect::set_zero(&mut boxed);
        assert_eq!(*boxed, 0);
    }
}
