//! The dense decoding state machine.
//!
//! Every item starts with one descriptor byte: the high nibble selects the
//! kind, the low nibble carries size information. See the crate docs for the
//! full layout.

use core::any::TypeId;
use std::borrow::Cow;
use std::time::Duration;

use imbue_core::{ExtValue, Reflect, Value};
use imbue_format::{
    check_float32, check_int_fits, check_uint_fits, int_to_uint, uint_to_int, ContainerShape,
    DecDriver, DecReader, DecodeError, EncodedType, Naked,
};

// High-nibble kinds.
const KIND_SPECIAL: u8 = 0x0;
const KIND_UINT: u8 = 0x1;
const KIND_NEGINT: u8 = 0x2;
const KIND_FLOAT: u8 = 0x3;
const KIND_STR: u8 = 0x4;
const KIND_BYTES: u8 = 0x5;
const KIND_ARRAY: u8 = 0x6;
const KIND_MAP: u8 = 0x7;
const KIND_TIME: u8 = 0x8;
const KIND_EXT: u8 = 0xf;

// KIND_SPECIAL low nibbles.
const SPECIAL_NIL: u8 = 0x0;
const SPECIAL_FALSE: u8 = 0x1;
const SPECIAL_TRUE: u8 = 0x2;
const SPECIAL_ZERO: u8 = 0x3;

// Length-scheme low nibbles: 0x0..=0xb inline, then sized prefixes.
const LEN_U8: u8 = 0xc;
const LEN_U16: u8 = 0xd;
const LEN_U32: u8 = 0xe;
const LEN_U64: u8 = 0xf;

/// Tag under which schema-less timestamps surface as [`Value::Ext`].
pub const TIMESTAMP_EXT_TAG: u8 = 0xff;

const EMPTY: &[u8] = &[];

/// Dense driver over a byte source.
pub struct DenseDriver<R> {
    reader: R,
    descriptor: u8,
    pending: bool,
    encoded_type: EncodedType,
}

impl<R> DenseDriver<R> {
    /// A driver reading items from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            descriptor: 0,
            pending: false,
            encoded_type: EncodedType::Unset,
        }
    }

    /// Consume the driver and return the byte source.
    pub fn into_reader(self) -> R {
        self.reader
    }

    fn consume(&mut self) {
        self.pending = false;
        self.encoded_type = EncodedType::Unset;
    }

    fn mismatch(&self, expected: &'static str) -> DecodeError {
        DecodeError::Mismatch {
            expected,
            found: self.encoded_type,
        }
    }

    fn vd(&self) -> u8 {
        self.descriptor >> 4
    }

    fn vs(&self) -> u8 {
        self.descriptor & 0x0f
    }
}

fn classify(descriptor: u8) -> Result<EncodedType, DecodeError> {
    let vd = descriptor >> 4;
    let vs = descriptor & 0x0f;
    let encoded = match vd {
        KIND_SPECIAL => match vs {
            SPECIAL_NIL => EncodedType::Nil,
            SPECIAL_FALSE | SPECIAL_TRUE => EncodedType::Bool,
            SPECIAL_ZERO => EncodedType::Uint,
            _ => return Err(DecodeError::BadDescriptor { descriptor }),
        },
        KIND_UINT if vs <= 7 => EncodedType::Uint,
        KIND_NEGINT if vs <= 7 => EncodedType::Int,
        KIND_FLOAT if vs == 4 || vs == 8 => EncodedType::Float,
        KIND_STR => EncodedType::Str,
        KIND_BYTES => EncodedType::Bytes,
        KIND_ARRAY => EncodedType::Array,
        KIND_MAP => EncodedType::Map,
        KIND_TIME if vs == 0 => EncodedType::Timestamp,
        KIND_EXT if vs == 0 => EncodedType::Ext,
        _ => return Err(DecodeError::BadDescriptor { descriptor }),
    };
    Ok(encoded)
}

impl<R> DenseDriver<R> {
    /// Big-endian magnitude stored in `vs + 1` bytes.
    fn read_magnitude<'de>(&mut self) -> Result<u64, DecodeError>
    where
        R: DecReader<'de>,
    {
        let width = self.vs() as usize + 1;
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 8) | u64::from(self.reader.read_u8()?);
        }
        Ok(value)
    }

    /// Length per the shared scheme: inline 0..=11 or a sized prefix.
    fn read_len<'de>(&mut self) -> Result<usize, DecodeError>
    where
        R: DecReader<'de>,
    {
        let len = match self.vs() {
            vs @ 0x0..=0xb => vs as u64,
            LEN_U8 => u64::from(self.reader.read_u8()?),
            LEN_U16 => u64::from(self.reader.read_u16()?),
            LEN_U32 => u64::from(self.reader.read_u32()?),
            LEN_U64 => self.reader.read_u64()?,
            _ => unreachable!("low nibble is four bits"),
        };
        usize::try_from(len).map_err(|_| DecodeError::Overflow {
            value: len.to_string(),
            target: "usize",
        })
    }

    fn read_ext_any<'de>(&mut self) -> Result<(u8, Cow<'de, [u8]>), DecodeError>
    where
        R: DecReader<'de>,
    {
        if self.vd() != KIND_EXT {
            return Err(self.mismatch("extension"));
        }
        let tag = self.reader.read_u8()?;
        let len = self.reader.read_u32()? as usize;
        let data = if len > 0 {
            self.reader.read_n(len)?
        } else {
            Cow::Borrowed(EMPTY)
        };
        self.consume();
        Ok((tag, data))
    }

    fn read_timestamp<'de>(&mut self) -> Result<Duration, DecodeError>
    where
        R: DecReader<'de>,
    {
        if self.vd() != KIND_TIME {
            return Err(self.mismatch("timestamp"));
        }
        let secs = self.reader.read_u64()?;
        let nanos = self.reader.read_u32()?;
        self.consume();
        if nanos >= 1_000_000_000 {
            return Err(DecodeError::Overflow {
                value: nanos.to_string(),
                target: "nanoseconds",
            });
        }
        Ok(Duration::new(secs, nanos))
    }
}

impl<'de, R: DecReader<'de>> DecDriver<'de> for DenseDriver<R> {
    fn init_read_next(&mut self) -> Result<(), DecodeError> {
        if self.pending {
            return Ok(());
        }
        self.descriptor = self.reader.read_u8()?;
        self.encoded_type = classify(self.descriptor)?;
        self.pending = true;
        Ok(())
    }

    fn try_decode_as_nil(&mut self) -> Result<bool, DecodeError> {
        self.init_read_next()?;
        if self.encoded_type == EncodedType::Nil {
            self.consume();
            return Ok(true);
        }
        Ok(false)
    }

    fn current_encoded_type(&self) -> EncodedType {
        if self.pending {
            self.encoded_type
        } else {
            EncodedType::Unset
        }
    }

    fn is_builtin_type(&self, id: TypeId) -> bool {
        id == TypeId::of::<Duration>()
    }

    fn decode_builtin(&mut self, id: TypeId, target: &mut dyn Reflect) -> Result<(), DecodeError> {
        if id != TypeId::of::<Duration>() {
            return Err(DecodeError::Internal("unclaimed builtin type"));
        }
        self.init_read_next()?;
        let duration = self.read_timestamp()?;
        match target.downcast_mut::<Duration>() {
            Some(slot) => {
                *slot = duration;
                Ok(())
            }
            None => Err(DecodeError::Internal("builtin destination type mismatch")),
        }
    }

    fn decode_naked(&mut self) -> Result<Naked, DecodeError> {
        self.init_read_next()?;
        Ok(match self.encoded_type {
            EncodedType::Nil => {
                self.consume();
                Naked::Nil
            }
            EncodedType::Bool => Naked::Handled(Value::Bool(self.decode_bool()?)),
            EncodedType::Int => Naked::Handled(Value::I64(self.decode_int(64)?)),
            EncodedType::Uint => Naked::Handled(Value::U64(self.decode_uint(64)?)),
            EncodedType::Float => Naked::Handled(Value::F64(self.decode_float(false)?)),
            EncodedType::Str => Naked::Handled(Value::Str(self.decode_str()?.into_owned())),
            EncodedType::Bytes => {
                let mut data = Vec::new();
                self.decode_bytes(&mut data)?;
                Naked::Handled(Value::Bytes(data))
            }
            EncodedType::Timestamp => {
                let duration = self.read_timestamp()?;
                let mut data = Vec::with_capacity(12);
                data.extend_from_slice(&duration.as_secs().to_be_bytes());
                data.extend_from_slice(&duration.subsec_nanos().to_be_bytes());
                Naked::Handled(Value::Ext(ExtValue {
                    tag: TIMESTAMP_EXT_TAG,
                    data,
                }))
            }
            EncodedType::Ext => {
                let (tag, data) = self.read_ext_any()?;
                Naked::Handled(Value::Ext(ExtValue {
                    tag,
                    data: data.into_owned(),
                }))
            }
            EncodedType::Map => Naked::Container(ContainerShape::Map),
            EncodedType::Array => Naked::Container(ContainerShape::Array),
            EncodedType::Unset => return Err(DecodeError::Internal("no pending stream item")),
        })
    }

    fn decode_int(&mut self, bits: u8) -> Result<i64, DecodeError> {
        self.init_read_next()?;
        let value = match self.vd() {
            KIND_SPECIAL if self.vs() == SPECIAL_ZERO => {
                self.consume();
                0
            }
            KIND_UINT => {
                let magnitude = self.read_magnitude()?;
                self.consume();
                uint_to_int(magnitude)?
            }
            KIND_NEGINT => {
                let magnitude = self.read_magnitude()?;
                self.consume();
                negate_magnitude(magnitude)?
            }
            _ => return Err(self.mismatch("integer")),
        };
        check_int_fits(value, bits)
    }

    fn decode_uint(&mut self, bits: u8) -> Result<u64, DecodeError> {
        self.init_read_next()?;
        let value = match self.vd() {
            KIND_SPECIAL if self.vs() == SPECIAL_ZERO => {
                self.consume();
                0
            }
            KIND_UINT => {
                let magnitude = self.read_magnitude()?;
                self.consume();
                magnitude
            }
            KIND_NEGINT => {
                let magnitude = self.read_magnitude()?;
                self.consume();
                int_to_uint(negate_magnitude(magnitude)?)?
            }
            _ => return Err(self.mismatch("unsigned integer")),
        };
        check_uint_fits(value, bits)
    }

    fn decode_float(&mut self, check32: bool) -> Result<f64, DecodeError> {
        self.init_read_next()?;
        let value = match self.encoded_type {
            EncodedType::Float => {
                let value = if self.vs() == 4 {
                    let bits = self.reader.read_u32()?;
                    f32::from_bits(bits) as f64
                } else {
                    let bits = self.reader.read_u64()?;
                    f64::from_bits(bits)
                };
                self.consume();
                value
            }
            // Integers widen silently into float destinations.
            EncodedType::Uint => self.decode_uint(64)? as f64,
            EncodedType::Int => self.decode_int(64)? as f64,
            _ => return Err(self.mismatch("float")),
        };
        if check32 {
            check_float32(value)
        } else {
            Ok(value)
        }
    }

    fn decode_bool(&mut self) -> Result<bool, DecodeError> {
        self.init_read_next()?;
        if self.vd() == KIND_SPECIAL {
            match self.vs() {
                SPECIAL_FALSE => {
                    self.consume();
                    return Ok(false);
                }
                SPECIAL_TRUE => {
                    self.consume();
                    return Ok(true);
                }
                _ => {}
            }
        }
        Err(self.mismatch("bool"))
    }

    fn decode_str(&mut self) -> Result<Cow<'de, str>, DecodeError> {
        self.init_read_next()?;
        if self.vd() != KIND_STR {
            return Err(self.mismatch("string"));
        }
        let len = self.read_len()?;
        let bytes = if len > 0 {
            self.reader.read_n(len)?
        } else {
            Cow::Borrowed(EMPTY)
        };
        self.consume();
        match bytes {
            Cow::Borrowed(raw) => core::str::from_utf8(raw)
                .map(Cow::Borrowed)
                .map_err(|_| DecodeError::InvalidUtf8),
            Cow::Owned(raw) => String::from_utf8(raw)
                .map(Cow::Owned)
                .map_err(|_| DecodeError::InvalidUtf8),
        }
    }

    fn decode_bytes(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        self.init_read_next()?;
        // Strings decode into byte buffers as raw data.
        if self.vd() != KIND_BYTES && self.vd() != KIND_STR {
            return Err(self.mismatch("bytes"));
        }
        let len = self.read_len()?;
        out.clear();
        if len > 0 {
            let data = self.reader.read_n(len)?;
            out.extend_from_slice(data.as_ref());
        }
        self.consume();
        Ok(())
    }

    fn decode_ext(&mut self, tag: u8) -> Result<Cow<'de, [u8]>, DecodeError> {
        self.init_read_next()?;
        let (found, data) = self.read_ext_any()?;
        if found != tag {
            return Err(DecodeError::ExtensionTagMismatch {
                expected: tag,
                found,
            });
        }
        Ok(data)
    }

    fn read_map_len(&mut self) -> Result<usize, DecodeError> {
        self.init_read_next()?;
        if self.vd() != KIND_MAP {
            return Err(self.mismatch("map"));
        }
        let len = self.read_len()?;
        self.consume();
        Ok(len)
    }

    fn read_array_len(&mut self) -> Result<usize, DecodeError> {
        self.init_read_next()?;
        if self.vd() != KIND_ARRAY {
            return Err(self.mismatch("array"));
        }
        let len = self.read_len()?;
        self.consume();
        Ok(len)
    }
}

/// Turn a stored magnitude into its negative value; `2^63` maps to
/// `i64::MIN`.
fn negate_magnitude(magnitude: u64) -> Result<i64, DecodeError> {
    const MIN_MAGNITUDE: u64 = i64::MAX as u64 + 1;
    if magnitude > MIN_MAGNITUDE {
        return Err(DecodeError::Overflow {
            value: format!("-{magnitude}"),
            target: "i64",
        });
    }
    if magnitude == MIN_MAGNITUDE {
        return Ok(i64::MIN);
    }
    Ok(-(magnitude as i64))
}
