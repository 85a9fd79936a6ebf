#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Compact nibble-tagged wire driver for the `imbue` decoder.
//!
//! Dense is a self-describing binary encoding built around one descriptor
//! byte per item: the high nibble selects the kind, the low nibble carries
//! size information.
//!
//! | High nibble | Kind | Low nibble |
//! |------------|------|------------|
//! | `0x0` | special | `0` nil, `1` false, `2` true, `3` zero |
//! | `0x1` | uint | byte width minus one (1–8 big-endian bytes follow) |
//! | `0x2` | negative int | byte width minus one of the magnitude |
//! | `0x3` | float | `4` = f32, `8` = f64 (big-endian bits follow) |
//! | `0x4` | string | length scheme |
//! | `0x5` | bytes | length scheme |
//! | `0x6` | array | length scheme (element count) |
//! | `0x7` | map | length scheme (pair count) |
//! | `0x8` | timestamp | `0`; u64 seconds + u32 nanoseconds follow |
//! | `0xf` | extension | `0`; tag byte + u32 length + payload follow |
//!
//! Length scheme: low nibble `0x0..=0xb` is the length inline; `0xc`, `0xd`,
//! `0xe`, `0xf` announce a u8/u16/u32/u64 big-endian length prefix.
//!
//! The format natively supports one destination type: timestamps decode
//! straight into [`std::time::Duration`]. Schema-less timestamps surface as
//! [`imbue_core::Value::Ext`] under [`TIMESTAMP_EXT_TAG`].

mod driver;

use std::io::Read;

use imbue_core::Reflect;
use imbue_format::{
    DecodeError, DecodeOptions, Decoder, ExtRegistry, Handle, IoReader, RegisterError, SliceReader,
};

pub use driver::{DenseDriver, TIMESTAMP_EXT_TAG};

/// Dense decoding configuration: options plus the extension registry.
#[derive(Default)]
pub struct DenseHandle {
    options: DecodeOptions,
    extensions: ExtRegistry,
}

impl DenseHandle {
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
    ) -> Decoder<'h, 'de, DenseDriver<SliceReader<'de>>> {
        Decoder::new(DenseDriver::new(SliceReader::new(input)), self)
    }

    /// A decoder reading from `reader`. Pass a buffered reader for
    /// efficiency.
    pub fn decoder<'h, R: Read>(
        &'h self,
        reader: R,
    ) -> Decoder<'h, 'static, DenseDriver<IoReader<R>>> {
        Decoder::new(DenseDriver::new(IoReader::new(reader)), self)
    }
}

impl Handle for DenseHandle {
    fn options(&self) -> &DecodeOptions {
        &self.options
    }

    fn extensions(&self) -> &ExtRegistry {
        &self.extensions
    }
}

/// Decode one dense value from `input` into `dest` under default options.
pub fn from_slice(input: &[u8], dest: &mut dyn Reflect) -> Result<(), DecodeError> {
    let handle = DenseHandle::new();
    let mut decoder = handle.decoder_bytes(input);
    decoder.decode(dest)
}

/// Decode one dense value from `reader` into `dest` under default options.
pub fn from_reader<R: Read>(reader: R, dest: &mut dyn Reflect) -> Result<(), DecodeError> {
    let handle = DenseHandle::new();
    let mut decoder = handle.decoder(reader);
    decoder.decode(dest)
}
