#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! MessagePack wire driver for the `imbue` decoder.
//!
//! The driver handles the full MessagePack descriptor set: fixint, fixmap,
//! fixarray, fixstr, nil, bool, bin, float, sized ints, str, array, map,
//! and the fixext/ext families. Timestamps arrive as extensions and surface
//! either through a registered extension converter or, schema-less, as
//! [`imbue_core::Value::Ext`].
//!
//! # Decoding
//!
//! ```
//! use imbue_format_msgpack::from_slice;
//!
//! // MessagePack encoding of {"x": 10}
//! let bytes = [0x81, 0xa1, b'x', 0x0a];
//! let mut map = std::collections::HashMap::<String, i64>::new();
//! from_slice(&bytes, &mut map).unwrap();
//! assert_eq!(map["x"], 10);
//! ```
//!
//! Destinations are updated in place: pre-populated containers keep
//! everything the stream does not mention.

mod driver;

use std::io::Read;

use imbue_core::Reflect;
use imbue_format::{
    DecodeError, DecodeOptions, Decoder, ExtRegistry, Handle, IoReader, RegisterError, SliceReader,
};

pub use driver::MsgpackDriver;
pub use imbue_format::DecodeError as Error;

/// MessagePack decoding configuration: options plus the extension registry.
#[derive(Default)]
pub struct MsgpackHandle {
    options: DecodeOptions,
    extensions: ExtRegistry,
}

impl MsgpackHandle {
    /// A handle with default options and no extensions.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle with the given options.
    pub fn with_options(options: DecodeOptions) -> Self {
        Self {
            options,
            extensions: ExtRegistry::new(),
        }
    }

    /// Mutable access to the decode options.
    pub fn options_mut(&mut self) -> &mut DecodeOptions {
        &mut self.options
    }

    /// Register an extension converter for `T` under `tag`.
    pub fn register_ext<T, F>(&mut self, tag: u8, convert: F) -> Result<(), RegisterError>
    where
        T: Reflect,
        F: Fn(&mut T, &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.extensions.register::<T, F>(tag, convert)
    }

    /// A decoder reading directly off `input` with zero copying.
    pub fn decoder_bytes<'h, 'de>(
        &'h self,
        input: &'de [u8],
    ) -> Decoder<'h, 'de, MsgpackDriver<SliceReader<'de>>> {
        Decoder::new(MsgpackDriver::new(SliceReader::new(input)), self)
    }

    /// A decoder reading from `reader`. Pass a buffered reader for
    /// efficiency.
    pub fn decoder<'h, R: Read>(
        &'h self,
        reader: R,
    ) -> Decoder<'h, 'static, MsgpackDriver<IoReader<R>>> {
        Decoder::new(MsgpackDriver::new(IoReader::new(reader)), self)
    }
}

impl Handle for MsgpackHandle {
    fn options(&self) -> &DecodeOptions {
        &self.options
    }

    fn extensions(&self) -> &ExtRegistry {
        &self.extensions
    }
}

/// Decode one MessagePack value from `input` into `dest` under default
/// options.
pub fn from_slice(input: &[u8], dest: &mut dyn Reflect) -> Result<(), DecodeError> {
    let handle = MsgpackHandle::new();
    let mut decoder = handle.decoder_bytes(input);
    decoder.decode(dest)
}

/// Decode one MessagePack value from `reader` into `dest` under default
/// options.
pub fn from_reader<R: Read>(reader: R, dest: &mut dyn Reflect) -> Result<(), DecodeError> {
    let handle = MsgpackHandle::new();
    let mut decoder = handle.decoder(reader);
    decoder.decode(dest)
}
