//! Per-instantiation shape storage for generic impls.
//!
//! A `static` inside a generic function is shared by every instantiation, so
//! generic `Shaped` impls cannot hold their `Shape` in a plain static. The
//! [`ShapeCell`] keys leaked shapes by [`TypeId`] instead: each concrete
//! instantiation gets its own immortal entry, built at most once.

use core::any::TypeId;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::shape::Shape;

pub(crate) fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// A `TypeId`-keyed cache of leaked [`Shape`]s.
///
/// Declared as a `static` inside a generic `Shaped::shape` body; see the
/// `Vec<T>` impl in this crate for the canonical usage.
pub struct ShapeCell {
    map: OnceLock<RwLock<HashMap<TypeId, &'static Shape>>>,
}

impl ShapeCell {
    /// An empty cell.
    pub const fn new() -> Self {
        Self {
            map: OnceLock::new(),
        }
    }

    /// The shape for `T`, building and leaking it on first sighting.
    pub fn get_or_init<T: 'static>(&self, init: impl FnOnce() -> Shape) -> &'static Shape {
        let map = self.map.get_or_init(|| RwLock::new(HashMap::new()));
        let id = TypeId::of::<T>();
        if let Some(shape) = read_guard(map).get(&id).copied() {
            return shape;
        }
        let mut guard = write_guard(map);
        if let Some(shape) = guard.get(&id).copied() {
            return shape;
        }
        let shape: &'static Shape = Box::leak(Box::new(init()));
        guard.insert(id, shape);
        shape
    }
}

impl Default for ShapeCell {
    fn default() -> Self {
        Self::new()
    }
}
