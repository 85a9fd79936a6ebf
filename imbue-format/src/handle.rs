//! Handle-side configuration: decode options and the extension registry.

use core::any::TypeId;
use std::collections::BTreeMap;
use std::collections::HashMap;

use imbue_core::{Reflect, Value};

use crate::error::RegisterError;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;
type ExtConvertFn = Box<dyn Fn(&mut dyn Reflect, &[u8]) -> Result<(), BoxedError> + Send + Sync>;

/// User-supplied decoding policy, owned by a format handle.
pub struct DecodeOptions {
    /// Fail with `UnknownField` when a stream map key matches no struct
    /// field, instead of discarding the value.
    pub error_if_no_field: bool,

    /// Route types with the binary-unmarshal capability through it. When
    /// off, such types decode structurally like any other.
    pub honor_binary_unmarshal: bool,

    /// Container built for a schema-less map in the stream. Defaults to a
    /// dynamic-keyed ordered map.
    pub map_factory: Option<fn() -> Value>,

    /// Container built for a schema-less array in the stream. Defaults to a
    /// dynamic sequence.
    pub seq_factory: Option<fn() -> Value>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            error_if_no_field: false,
            honor_binary_unmarshal: true,
            map_factory: None,
            seq_factory: None,
        }
    }
}

impl DecodeOptions {
    pub(crate) fn new_map_value(&self) -> Value {
        match self.map_factory {
            Some(factory) => factory(),
            None => Value::Map(BTreeMap::new()),
        }
    }

    pub(crate) fn new_seq_value(&self) -> Value {
        match self.seq_factory {
            Some(factory) => factory(),
            None => Value::Seq(Vec::new()),
        }
    }
}

/// A registered extension: tag plus the converter that populates a
/// destination from the raw payload.
pub struct ExtEntry {
    tag: u8,
    type_name: &'static str,
    convert: ExtConvertFn,
}

impl ExtEntry {
    /// The wire tag this extension claims.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The registered destination type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Run the converter against a destination slot.
    pub fn convert(&self, target: &mut dyn Reflect, data: &[u8]) -> Result<(), BoxedError> {
        (self.convert)(target, data)
    }
}

/// Extensions keyed by destination type, with tag uniqueness enforced at
/// registration.
#[derive(Default)]
pub struct ExtRegistry {
    by_id: HashMap<TypeId, ExtEntry>,
    tags: HashMap<u8, TypeId>,
}

impl ExtRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `convert` for `T` under `tag`.
    ///
    /// Tag 0 is reserved; a tag or a type may be registered at most once.
    pub fn register<T, F>(&mut self, tag: u8, convert: F) -> Result<(), RegisterError>
    where
        T: Reflect,
        F: Fn(&mut T, &[u8]) -> Result<(), BoxedError> + Send + Sync + 'static,
    {
        if tag == 0 {
            return Err(RegisterError::ReservedTag);
        }
        if self.tags.contains_key(&tag) {
            return Err(RegisterError::DuplicateTag { tag });
        }
        let id = TypeId::of::<T>();
        let type_name = core::any::type_name::<T>();
        if self.by_id.contains_key(&id) {
            return Err(RegisterError::DuplicateType { type_name });
        }
        let entry = ExtEntry {
            tag,
            type_name,
            convert: Box::new(move |target, data| match target.downcast_mut::<T>() {
                Some(concrete) => convert(concrete, data),
                None => Err("extension destination type mismatch".into()),
            }),
        };
        self.tags.insert(tag, id);
        self.by_id.insert(id, entry);
        Ok(())
    }

    /// The extension registered for a destination type, if any.
    pub fn get(&self, id: TypeId) -> Option<&ExtEntry> {
        self.by_id.get(&id)
    }
}

/// What a decoder needs from its format handle: policy and extensions. The
/// decoder borrows the handle for its whole lifetime, so neither can change
/// underneath a decode in progress.
pub trait Handle {
    /// The decoding policy.
    fn options(&self) -> &DecodeOptions;

    /// The extension registry.
    fn extensions(&self) -> &ExtRegistry;
}
