//! The foundational reflection traits.

use core::any::{Any, TypeId};

use crate::ops::ReflectMut;
use crate::shape::Shape;

/// A type that can absorb an opaque byte payload.
///
/// The decoding engine routes a whole encoded byte blob to this capability
/// when the destination type (or a pointee along its pointer chain) declares
/// it, instead of decoding structurally.
pub trait BinaryUnmarshal {
    /// Populate `self` from `data`. The payload's interpretation is entirely
    /// owned by the implementation.
    fn unmarshal_binary(
        &mut self,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Access to the `&'static` shape of a concrete (sized) type.
///
/// This is the non-object-safe companion of [`Reflect`]: composite impls use
/// it to reach child shapes without an instance.
pub trait Shaped: 'static {
    /// The static descriptor for `Self`.
    fn shape() -> &'static Shape;
}

/// An object-safe handle onto a destination memory slot.
///
/// Derive this with `#[derive(Reflect)]` from `imbue-derive` for structs;
/// impls for scalars, `String`, `Vec`, arrays, maps, `Option`, `Box`, and
/// [`crate::Value`] are provided here.
pub trait Reflect: Any {
    /// The static descriptor for the concrete type behind this value.
    fn reflect_shape(&self) -> &'static Shape;

    /// A kind-discriminated mutable cursor onto this value.
    fn reflect_mut(&mut self) -> ReflectMut<'_>;

    /// Reset this value to the zero of its type: `0`, `false`, empty string,
    /// `None`, cleared containers, field-wise zero for structs.
    fn set_zero(&mut self);

    /// Upcast to [`Any`] by shared reference.
    fn as_any(&self) -> &dyn Any;

    /// Upcast to [`Any`] by mutable reference.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Upcast to a boxed [`Any`].
    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// The binary-unmarshal capability of this value, if it has one.
    fn as_binary_unmarshal(&mut self) -> Option<&mut dyn BinaryUnmarshal> {
        None
    }
}

impl dyn Reflect {
    /// Whether the underlying concrete type is `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().type_id() == TypeId::of::<T>()
    }

    /// Downcast by shared reference.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcast by mutable reference.
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Downcast an owned box, unboxing the value.
    ///
    /// Returns the box unchanged when the underlying type is not `T`.
    pub fn take<T: Any>(self: Box<dyn Reflect>) -> Result<T, Box<dyn Reflect>> {
        if !(*self).is::<T>() {
            return Err(self);
        }
        match self.into_any().downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => unreachable!("type identity verified before downcast"),
        }
    }
}
