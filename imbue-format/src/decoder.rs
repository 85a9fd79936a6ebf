//! The recursive, plan-cached decoding engine.
//!
//! [`Decoder`] marries three things: the structural kind of the destination
//! (read through its `ReflectMut` cursor), the wire kind of the current
//! stream item (read through the driver), and the reconciliation policy for
//! nils, empties, and length mismatches. Per destination type it caches a
//! [`Plan`] (the chosen leaf handler plus the memoized `TypeInfo`), so the
//! hot path does a hash probe instead of repeated shape inspection.
//!
//! Update-in-place is the ruling policy: decoding into a pre-populated
//! container replaces only what the stream mentions. A stream nil zeroes its
//! target; a key or element the stream never mentions is left untouched.

use core::any::TypeId;
use core::marker::PhantomData;
use std::collections::HashMap;

use imbue_core::{
    type_info, FieldIndex, Reflect, ReflectMut, ShapeKind, Struct, TypeInfo, Value,
};

use crate::driver::{ContainerShape, DecDriver, EncodedType, Naked};
use crate::error::DecodeError;
use crate::handle::{DecodeOptions, Handle};
use crate::trace;

/// The cached decoding recipe for one destination type.
#[derive(Clone, Copy)]
struct Plan {
    info: &'static TypeInfo,
    kind: PlanKind,
}

/// Leaf handler selector. Chosen once per destination type, in precedence
/// order: driver builtin, registered extension, binary-unmarshal capability,
/// then structural kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanKind {
    Builtin,
    Ext { tag: u8 },
    BinaryUnmarshal,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    Str,
    Bytes,
    Ptr,
    Dynamic,
    Struct,
    List,
    Array,
    Map,
    Unsupported,
}

/// A decoder reads and decodes one value per [`Decoder::decode`] call from
/// an input stream in the handle's wire format.
///
/// Not safe for concurrent use; the caller serializes. The driver, its byte
/// source, and the plan cache are exclusively owned by the decoder for its
/// lifetime.
pub struct Decoder<'h, 'de, D: DecDriver<'de>> {
    driver: D,
    handle: &'h dyn Handle,
    plans: HashMap<TypeId, Plan>,
    _stream: PhantomData<&'de ()>,
}

impl<'h, 'de, D: DecDriver<'de>> Decoder<'h, 'de, D> {
    /// A decoder driving `driver` under `handle`'s policy.
    pub fn new(driver: D, handle: &'h dyn Handle) -> Self {
        Self {
            driver,
            handle,
            plans: HashMap::new(),
            _stream: PhantomData,
        }
    }

    /// Consume the decoder and return its driver, e.g. to inspect how much
    /// of the input was consumed.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Number of per-type plans built so far. Debug hook for asserting
    /// cache behavior in tests.
    pub fn cached_plan_count(&self) -> usize {
        self.plans.len()
    }

    fn options(&self) -> &DecodeOptions {
        self.handle.options()
    }

    /// Decode the next stream item into `dest`, consuming exactly one
    /// top-level value.
    ///
    /// A stream nil zeroes the destination whatever its kind. Plain scalar
    /// destinations then take a fast path straight to the driver's typed
    /// readers, bypassing the plan cache.
    pub fn decode(&mut self, dest: &mut dyn Reflect) -> Result<(), DecodeError> {
        self.driver.init_read_next()?;
        if self.driver.try_decode_as_nil()? {
            dest.set_zero();
            return Ok(());
        }
        match dest.reflect_mut() {
            ReflectMut::Bool(v) => {
                *v = self.driver.decode_bool()?;
                return Ok(());
            }
            ReflectMut::I8(v) => {
                *v = self.driver.decode_int(8)? as i8;
                return Ok(());
            }
            ReflectMut::I16(v) => {
                *v = self.driver.decode_int(16)? as i16;
                return Ok(());
            }
            ReflectMut::I32(v) => {
                *v = self.driver.decode_int(32)? as i32;
                return Ok(());
            }
            ReflectMut::I64(v) => {
                *v = self.driver.decode_int(64)?;
                return Ok(());
            }
            ReflectMut::Isize(v) => {
                *v = self.driver.decode_int(isize::BITS as u8)? as isize;
                return Ok(());
            }
            ReflectMut::U8(v) => {
                *v = self.driver.decode_uint(8)? as u8;
                return Ok(());
            }
            ReflectMut::U16(v) => {
                *v = self.driver.decode_uint(16)? as u16;
                return Ok(());
            }
            ReflectMut::U32(v) => {
                *v = self.driver.decode_uint(32)? as u32;
                return Ok(());
            }
            ReflectMut::U64(v) => {
                *v = self.driver.decode_uint(64)?;
                return Ok(());
            }
            ReflectMut::Usize(v) => {
                *v = self.driver.decode_uint(usize::BITS as u8)? as usize;
                return Ok(());
            }
            ReflectMut::F32(v) => {
                *v = self.driver.decode_float(true)? as f32;
                return Ok(());
            }
            ReflectMut::F64(v) => {
                *v = self.driver.decode_float(false)?;
                return Ok(());
            }
            ReflectMut::Str(v) => {
                *v = self.driver.decode_str()?.into_owned();
                return Ok(());
            }
            ReflectMut::Bytes(v) => {
                return self.driver.decode_bytes(v);
            }
            _ => {}
        }
        self.decode_value(dest)
    }

    /// The recursive entry: one stream item into one destination slot.
    fn decode_value(&mut self, rv: &mut dyn Reflect) -> Result<(), DecodeError> {
        self.driver.init_read_next()?;

        // A dynamic slot holding nothing gets its shape from the stream.
        if let ReflectMut::Value(v) = rv.reflect_mut() {
            if v.is_null() {
                return self.decode_dynamic(v);
            }
        }

        // A stream nil zeroes the destination: scalars to 0, options to
        // None, containers emptied.
        if self.driver.try_decode_as_nil()? {
            rv.set_zero();
            return Ok(());
        }

        let plan = self.plan_for(rv)?;
        self.run_plan(plan, rv)
    }

    fn plan_for(&mut self, rv: &mut dyn Reflect) -> Result<Plan, DecodeError> {
        let shape = rv.reflect_shape();
        let id = shape.type_id();
        if let Some(plan) = self.plans.get(&id) {
            return Ok(*plan);
        }

        let info = type_info(shape)?;
        let kind = if self.driver.is_builtin_type(info.base_id()) {
            PlanKind::Builtin
        } else if let Some(entry) = self.handle.extensions().get(info.base_id()) {
            PlanKind::Ext { tag: entry.tag() }
        } else if self.options().honor_binary_unmarshal && info.unmarshal_level().is_some() {
            PlanKind::BinaryUnmarshal
        } else {
            match shape.kind {
                ShapeKind::Bool => PlanKind::Bool,
                ShapeKind::I8 => PlanKind::I8,
                ShapeKind::I16 => PlanKind::I16,
                ShapeKind::I32 => PlanKind::I32,
                ShapeKind::I64 => PlanKind::I64,
                ShapeKind::Isize => PlanKind::Isize,
                ShapeKind::U8 => PlanKind::U8,
                ShapeKind::U16 => PlanKind::U16,
                ShapeKind::U32 => PlanKind::U32,
                ShapeKind::U64 => PlanKind::U64,
                ShapeKind::Usize => PlanKind::Usize,
                ShapeKind::F32 => PlanKind::F32,
                ShapeKind::F64 => PlanKind::F64,
                ShapeKind::Str => PlanKind::Str,
                ShapeKind::Bytes => PlanKind::Bytes,
                ShapeKind::Ptr { .. } => PlanKind::Ptr,
                ShapeKind::Dynamic => PlanKind::Dynamic,
                ShapeKind::Struct { .. } => PlanKind::Struct,
                ShapeKind::List { .. } => PlanKind::List,
                ShapeKind::Array { .. } => PlanKind::Array,
                ShapeKind::Map { .. } => PlanKind::Map,
                ShapeKind::Opaque => PlanKind::Unsupported,
            }
        };

        trace!(type_name = shape.type_name, plan = ?kind, "caching decode plan");
        let plan = Plan { info, kind };
        self.plans.insert(id, plan);
        Ok(plan)
    }

    fn run_plan(&mut self, plan: Plan, rv: &mut dyn Reflect) -> Result<(), DecodeError> {
        match plan.kind {
            PlanKind::Builtin => return self.k_builtin(plan.info, rv),
            PlanKind::Ext { tag } => return self.k_ext(plan.info, tag, rv),
            PlanKind::BinaryUnmarshal => return self.k_binary_unmarshal(plan.info, rv),
            PlanKind::Unsupported => {
                return Err(DecodeError::UnsupportedKind {
                    type_name: rv.reflect_shape().type_name,
                })
            }
            _ => {}
        }
        match (plan.kind, rv.reflect_mut()) {
            (PlanKind::Bool, ReflectMut::Bool(v)) => {
                *v = self.driver.decode_bool()?;
                Ok(())
            }
            (PlanKind::I8, ReflectMut::I8(v)) => {
                *v = self.driver.decode_int(8)? as i8;
                Ok(())
            }
            (PlanKind::I16, ReflectMut::I16(v)) => {
                *v = self.driver.decode_int(16)? as i16;
                Ok(())
            }
            (PlanKind::I32, ReflectMut::I32(v)) => {
                *v = self.driver.decode_int(32)? as i32;
                Ok(())
            }
            (PlanKind::I64, ReflectMut::I64(v)) => {
                *v = self.driver.decode_int(64)?;
                Ok(())
            }
            (PlanKind::Isize, ReflectMut::Isize(v)) => {
                *v = self.driver.decode_int(isize::BITS as u8)? as isize;
                Ok(())
            }
            (PlanKind::U8, ReflectMut::U8(v)) => {
                *v = self.driver.decode_uint(8)? as u8;
                Ok(())
            }
            (PlanKind::U16, ReflectMut::U16(v)) => {
                *v = self.driver.decode_uint(16)? as u16;
                Ok(())
            }
            (PlanKind::U32, ReflectMut::U32(v)) => {
                *v = self.driver.decode_uint(32)? as u32;
                Ok(())
            }
            (PlanKind::U64, ReflectMut::U64(v)) => {
                *v = self.driver.decode_uint(64)?;
                Ok(())
            }
            (PlanKind::Usize, ReflectMut::Usize(v)) => {
                *v = self.driver.decode_uint(usize::BITS as u8)? as usize;
                Ok(())
            }
            (PlanKind::F32, ReflectMut::F32(v)) => {
                *v = self.driver.decode_float(true)? as f32;
                Ok(())
            }
            (PlanKind::F64, ReflectMut::F64(v)) => {
                *v = self.driver.decode_float(false)?;
                Ok(())
            }
            (PlanKind::Str, ReflectMut::Str(v)) => {
                *v = self.driver.decode_str()?.into_owned();
                Ok(())
            }
            (PlanKind::Bytes, ReflectMut::Bytes(v)) => self.driver.decode_bytes(v),
            (PlanKind::Ptr, ReflectMut::Ptr(p)) => {
                // Never overwrites a present pointee; allocates only when
                // unset.
                let pointee = p.ensure_pointee();
                self.decode_value(pointee)
            }
            (PlanKind::Dynamic, ReflectMut::Value(v)) => self.decode_dynamic(v),
            (PlanKind::Struct, ReflectMut::Struct(st)) => self.k_struct(st, plan.info),
            (PlanKind::List, ReflectMut::List(list)) => self.k_list(list),
            (PlanKind::Array, ReflectMut::Array(arr)) => self.k_array(arr),
            (PlanKind::Map, ReflectMut::Map(map)) => self.k_map(map),
            _ => Err(DecodeError::Internal(
                "cached plan does not match destination kind",
            )),
        }
    }

    /// Populate a dynamic slot.
    ///
    /// A null slot takes whatever shape the driver reports; a populated one
    /// is updated in place through its current variant.
    fn decode_dynamic(&mut self, v: &mut Value) -> Result<(), DecodeError> {
        if v.is_null() {
            return match self.driver.decode_naked()? {
                Naked::Nil => Ok(()),
                Naked::Handled(value) => {
                    *v = value;
                    Ok(())
                }
                Naked::Container(ContainerShape::Map) => {
                    *v = self.options().new_map_value();
                    self.decode_dynamic(v)
                }
                Naked::Container(ContainerShape::Array) => {
                    *v = self.options().new_seq_value();
                    self.decode_dynamic(v)
                }
            };
        }

        if self.driver.try_decode_as_nil()? {
            *v = Value::Null;
            return Ok(());
        }
        match v {
            Value::Bool(b) => *b = self.driver.decode_bool()?,
            Value::I64(i) => *i = self.driver.decode_int(64)?,
            Value::U64(u) => *u = self.driver.decode_uint(64)?,
            Value::F64(f) => *f = self.driver.decode_float(false)?,
            Value::Str(s) => *s = self.driver.decode_str()?.into_owned(),
            Value::Bytes(b) => self.driver.decode_bytes(b)?,
            Value::Seq(seq) => self.k_list(seq)?,
            Value::Map(map) => self.k_map(map)?,
            Value::Null | Value::Ext(_) => {
                // No in-place story for these; re-synthesize from the stream.
                *v = Value::Null;
                return self.decode_dynamic(v);
            }
        }
        Ok(())
    }

    fn k_struct(&mut self, st: &mut dyn Struct, info: &'static TypeInfo) -> Result<(), DecodeError> {
        match self.driver.current_encoded_type() {
            EncodedType::Map => {
                let pairs = self.driver.read_map_len()?;
                for _ in 0..pairs {
                    self.driver.init_read_next()?;
                    let key = self.driver.decode_str()?;
                    match info.index_for_enc_name(key.as_ref()) {
                        Some(position) => {
                            let field = info.field(position);
                            let slot = field_slot(&mut *st, &field.index)?;
                            self.decode_value(slot)?;
                        }
                        None => {
                            if self.options().error_if_no_field {
                                return Err(DecodeError::UnknownField {
                                    type_name: info.base_shape().type_name,
                                    field: key.into_owned(),
                                });
                            }
                            self.discard_value()?;
                        }
                    }
                }
                Ok(())
            }
            EncodedType::Array => {
                let len = self.driver.read_array_len()?;
                let field_count = info.fields().len();
                for position in 0..field_count.min(len) {
                    let field = info.field(position);
                    let slot = field_slot(&mut *st, &field.index)?;
                    self.decode_value(slot)?;
                }
                // Stream longer than the struct: drain the excess.
                for _ in field_count..len {
                    self.discard_value()?;
                }
                Ok(())
            }
            other => Err(DecodeError::StructShapeMismatch { found: other }),
        }
    }

    fn k_list(&mut self, list: &mut dyn imbue_core::List) -> Result<(), DecodeError> {
        let len = self.driver.read_array_len()?;
        if len > list.len() {
            list.grow_to(len);
        }
        // A destination longer than the stream keeps its tail untouched.
        for index in 0..len {
            let slot = list
                .get_mut(index)
                .ok_or(DecodeError::Internal("list element out of range"))?;
            self.decode_value(slot)?;
        }
        Ok(())
    }

    fn k_array(&mut self, arr: &mut dyn imbue_core::Array) -> Result<(), DecodeError> {
        let len = self.driver.read_array_len()?;
        if len > arr.len() {
            return Err(DecodeError::CannotGrow {
                len: arr.len(),
                needed: len,
            });
        }
        for index in 0..len {
            let slot = arr
                .get_mut(index)
                .ok_or(DecodeError::Internal("array element out of range"))?;
            self.decode_value(slot)?;
        }
        Ok(())
    }

    fn k_map(&mut self, map: &mut dyn imbue_core::Map) -> Result<(), DecodeError> {
        let pairs = self.driver.read_map_len()?;
        for _ in 0..pairs {
            let mut key = map.new_key();
            self.decode_value(&mut *key)?;
            // A dynamic byte-sequence key becomes a string so it can be
            // looked up; typed key slots reject mismatches through their
            // own readers.
            if let Some(dynamic) = key.downcast_mut::<Value>() {
                if let Value::Bytes(bytes) = dynamic {
                    let text = String::from_utf8_lossy(bytes).into_owned();
                    *dynamic = Value::Str(text);
                }
            }
            let slot = map
                .entry_mut(key)
                .ok_or(DecodeError::Internal("map key type mismatch"))?;
            self.decode_value(slot)?;
        }
        Ok(())
    }

    fn k_builtin(&mut self, info: &'static TypeInfo, rv: &mut dyn Reflect) -> Result<(), DecodeError> {
        let base = deref_levels(rv, info.base_indir())?;
        self.driver.decode_builtin(info.base_id(), base)
    }

    fn k_ext(
        &mut self,
        info: &'static TypeInfo,
        tag: u8,
        rv: &mut dyn Reflect,
    ) -> Result<(), DecodeError> {
        let payload = self.driver.decode_ext(tag)?;
        let handle = self.handle;
        let entry = handle
            .extensions()
            .get(info.base_id())
            .ok_or(DecodeError::Internal("extension plan without registration"))?;
        let base = deref_levels(rv, info.base_indir())?;
        entry
            .convert(base, payload.as_ref())
            .map_err(DecodeError::UserConverter)
    }

    fn k_binary_unmarshal(
        &mut self,
        info: &'static TypeInfo,
        rv: &mut dyn Reflect,
    ) -> Result<(), DecodeError> {
        let mut payload = Vec::new();
        self.driver.decode_bytes(&mut payload)?;
        let level = info
            .unmarshal_level()
            .ok_or(DecodeError::Internal("unmarshal plan without capability"))?;
        let target = deref_levels(rv, level)?;
        let unmarshal = target
            .as_binary_unmarshal()
            .ok_or(DecodeError::Internal("capability lost at unmarshal level"))?;
        unmarshal
            .unmarshal_binary(&payload)
            .map_err(DecodeError::UserConverter)
    }

    /// Decode and drop the current stream item.
    fn discard_value(&mut self) -> Result<(), DecodeError> {
        let mut sink = Value::Null;
        self.decode_value(&mut sink)
    }
}

/// Resolve a field slot through its shallow index or flatten path.
fn field_slot<'a>(
    st: &'a mut dyn Struct,
    index: &FieldIndex,
) -> Result<&'a mut dyn Reflect, DecodeError> {
    match index {
        FieldIndex::Flat(i) => st
            .field_mut(*i)
            .ok_or(DecodeError::Internal("field index out of range")),
        FieldIndex::Path(path) => {
            let (&first, rest) = path
                .split_first()
                .ok_or(DecodeError::Internal("empty field path"))?;
            let slot = st
                .field_mut(first)
                .ok_or(DecodeError::Internal("field index out of range"))?;
            walk_path(slot, rest)
        }
    }
}

fn walk_path<'a>(
    slot: &'a mut dyn Reflect,
    path: &[usize],
) -> Result<&'a mut dyn Reflect, DecodeError> {
    let Some((&next, rest)) = path.split_first() else {
        return Ok(slot);
    };
    match slot.reflect_mut() {
        ReflectMut::Struct(inner) => {
            let child = inner
                .field_mut(next)
                .ok_or(DecodeError::Internal("field index out of range"))?;
            walk_path(child, rest)
        }
        _ => Err(DecodeError::Internal(
            "field path does not traverse a struct",
        )),
    }
}

/// Walk `levels` pointer hops, allocating unset pointees along the way.
fn deref_levels(rv: &mut dyn Reflect, levels: u8) -> Result<&mut dyn Reflect, DecodeError> {
    if levels == 0 {
        return Ok(rv);
    }
    match rv.reflect_mut() {
        ReflectMut::Ptr(ptr) => deref_levels(ptr.ensure_pointee(), levels - 1),
        _ => Err(DecodeError::Internal("pointer chain shorter than recorded")),
    }
}
