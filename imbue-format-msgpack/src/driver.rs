//! The MessagePack decoding state machine.

use std::borrow::Cow;

use imbue_core::{ExtValue, Value};
use imbue_format::{
    check_float32, check_int_fits, check_uint_fits, int_to_uint, uint_to_int, ContainerShape,
    DecDriver, DecReader, DecodeError, EncodedType, Naked,
};

// MessagePack format constants.
const MSGPACK_NIL: u8 = 0xc0;
const MSGPACK_FALSE: u8 = 0xc2;
const MSGPACK_TRUE: u8 = 0xc3;
const MSGPACK_BIN8: u8 = 0xc4;
const MSGPACK_BIN16: u8 = 0xc5;
const MSGPACK_BIN32: u8 = 0xc6;
const MSGPACK_EXT8: u8 = 0xc7;
const MSGPACK_EXT16: u8 = 0xc8;
const MSGPACK_EXT32: u8 = 0xc9;
const MSGPACK_FLOAT32: u8 = 0xca;
const MSGPACK_FLOAT64: u8 = 0xcb;
const MSGPACK_UINT8: u8 = 0xcc;
const MSGPACK_UINT16: u8 = 0xcd;
const MSGPACK_UINT32: u8 = 0xce;
const MSGPACK_UINT64: u8 = 0xcf;
const MSGPACK_INT8: u8 = 0xd0;
const MSGPACK_INT16: u8 = 0xd1;
const MSGPACK_INT32: u8 = 0xd2;
const MSGPACK_INT64: u8 = 0xd3;
const MSGPACK_FIXEXT1: u8 = 0xd4;
const MSGPACK_FIXEXT2: u8 = 0xd5;
const MSGPACK_FIXEXT4: u8 = 0xd6;
const MSGPACK_FIXEXT8: u8 = 0xd7;
const MSGPACK_FIXEXT16: u8 = 0xd8;
const MSGPACK_STR8: u8 = 0xd9;
const MSGPACK_STR16: u8 = 0xda;
const MSGPACK_STR32: u8 = 0xdb;
const MSGPACK_ARRAY16: u8 = 0xdc;
const MSGPACK_ARRAY32: u8 = 0xdd;
const MSGPACK_MAP16: u8 = 0xde;
const MSGPACK_MAP32: u8 = 0xdf;

const MSGPACK_POSFIXINT_MAX: u8 = 0x7f;
const MSGPACK_FIXMAP_MIN: u8 = 0x80;
const MSGPACK_FIXMAP_MAX: u8 = 0x8f;
const MSGPACK_FIXARRAY_MIN: u8 = 0x90;
const MSGPACK_FIXARRAY_MAX: u8 = 0x9f;
const MSGPACK_FIXSTR_MIN: u8 = 0xa0;
const MSGPACK_FIXSTR_MAX: u8 = 0xbf;
const MSGPACK_NEGFIXINT_MIN: u8 = 0xe0;

const EMPTY: &[u8] = &[];

/// MessagePack driver over a byte source.
pub struct MsgpackDriver<R> {
    reader: R,
    descriptor: u8,
    pending: bool,
    encoded_type: EncodedType,
}

impl<R> MsgpackDriver<R> {
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
}

fn classify(descriptor: u8) -> Result<EncodedType, DecodeError> {
    Ok(match descriptor {
        0x00..=MSGPACK_POSFIXINT_MAX => EncodedType::Uint,
        MSGPACK_FIXMAP_MIN..=MSGPACK_FIXMAP_MAX => EncodedType::Map,
        MSGPACK_FIXARRAY_MIN..=MSGPACK_FIXARRAY_MAX => EncodedType::Array,
        MSGPACK_FIXSTR_MIN..=MSGPACK_FIXSTR_MAX => EncodedType::Str,
        MSGPACK_NIL => EncodedType::Nil,
        MSGPACK_FALSE | MSGPACK_TRUE => EncodedType::Bool,
        MSGPACK_BIN8 | MSGPACK_BIN16 | MSGPACK_BIN32 => EncodedType::Bytes,
        MSGPACK_EXT8 | MSGPACK_EXT16 | MSGPACK_EXT32 => EncodedType::Ext,
        MSGPACK_FLOAT32 | MSGPACK_FLOAT64 => EncodedType::Float,
        MSGPACK_UINT8 | MSGPACK_UINT16 | MSGPACK_UINT32 | MSGPACK_UINT64 => EncodedType::Uint,
        MSGPACK_INT8 | MSGPACK_INT16 | MSGPACK_INT32 | MSGPACK_INT64 => EncodedType::Int,
        MSGPACK_FIXEXT1 | MSGPACK_FIXEXT2 | MSGPACK_FIXEXT4 | MSGPACK_FIXEXT8
        | MSGPACK_FIXEXT16 => EncodedType::Ext,
        MSGPACK_STR8 | MSGPACK_STR16 | MSGPACK_STR32 => EncodedType::Str,
        MSGPACK_ARRAY16 | MSGPACK_ARRAY32 => EncodedType::Array,
        MSGPACK_MAP16 | MSGPACK_MAP32 => EncodedType::Map,
        MSGPACK_NEGFIXINT_MIN..=0xff => EncodedType::Int,
        _ => return Err(DecodeError::BadDescriptor { descriptor }),
    })
}

impl<R> MsgpackDriver<R> {
    fn str_len<'de>(&mut self) -> Result<usize, DecodeError>
    where
        R: DecReader<'de>,
    {
        match self.descriptor {
            MSGPACK_FIXSTR_MIN..=MSGPACK_FIXSTR_MAX => Ok((self.descriptor & 0x1f) as usize),
            MSGPACK_STR8 => Ok(self.reader.read_u8()? as usize),
            MSGPACK_STR16 => Ok(self.reader.read_u16()? as usize),
            MSGPACK_STR32 => Ok(self.reader.read_u32()? as usize),
            _ => Err(self.mismatch("string")),
        }
    }

    /// Read the pending extension header and payload without a tag check.
    fn read_ext_any<'de>(&mut self) -> Result<(u8, Cow<'de, [u8]>), DecodeError>
    where
        R: DecReader<'de>,
    {
        let len = match self.descriptor {
            MSGPACK_FIXEXT1 => 1,
            MSGPACK_FIXEXT2 => 2,
            MSGPACK_FIXEXT4 => 4,
            MSGPACK_FIXEXT8 => 8,
            MSGPACK_FIXEXT16 => 16,
            MSGPACK_EXT8 => self.reader.read_u8()? as usize,
            MSGPACK_EXT16 => self.reader.read_u16()? as usize,
            MSGPACK_EXT32 => self.reader.read_u32()? as usize,
            _ => return Err(self.mismatch("extension")),
        };
        let tag = self.reader.read_u8()?;
        let data = if len > 0 {
            self.reader.read_n(len)?
        } else {
            Cow::Borrowed(EMPTY)
        };
        self.consume();
        Ok((tag, data))
    }
}

impl<'de, R: DecReader<'de>> DecDriver<'de> for MsgpackDriver<R> {
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
        if self.descriptor == MSGPACK_NIL {
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
            EncodedType::Ext | EncodedType::Timestamp => {
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
        let value = match self.descriptor {
            0x00..=MSGPACK_POSFIXINT_MAX => {
                let v = self.descriptor as i64;
                self.consume();
                v
            }
            MSGPACK_NEGFIXINT_MIN..=0xff => {
                let v = self.descriptor as i8 as i64;
                self.consume();
                v
            }
            MSGPACK_INT8 => {
                let v = self.reader.read_u8()? as i8 as i64;
                self.consume();
                v
            }
            MSGPACK_INT16 => {
                let v = self.reader.read_u16()? as i16 as i64;
                self.consume();
                v
            }
            MSGPACK_INT32 => {
                let v = self.reader.read_u32()? as i32 as i64;
                self.consume();
                v
            }
            MSGPACK_INT64 => {
                let v = self.reader.read_u64()? as i64;
                self.consume();
                v
            }
            MSGPACK_UINT8 => {
                let v = self.reader.read_u8()? as i64;
                self.consume();
                v
            }
            MSGPACK_UINT16 => {
                let v = self.reader.read_u16()? as i64;
                self.consume();
                v
            }
            MSGPACK_UINT32 => {
                let v = self.reader.read_u32()? as i64;
                self.consume();
                v
            }
            MSGPACK_UINT64 => {
                let v = self.reader.read_u64()?;
                self.consume();
                uint_to_int(v)?
            }
            _ => return Err(self.mismatch("integer")),
        };
        check_int_fits(value, bits)
    }

    fn decode_uint(&mut self, bits: u8) -> Result<u64, DecodeError> {
        self.init_read_next()?;
        let value = match self.descriptor {
            0x00..=MSGPACK_POSFIXINT_MAX => {
                let v = self.descriptor as u64;
                self.consume();
                v
            }
            MSGPACK_NEGFIXINT_MIN..=0xff => {
                let v = self.descriptor as i8 as i64;
                self.consume();
                int_to_uint(v)?
            }
            MSGPACK_UINT8 => {
                let v = self.reader.read_u8()? as u64;
                self.consume();
                v
            }
            MSGPACK_UINT16 => {
                let v = self.reader.read_u16()? as u64;
                self.consume();
                v
            }
            MSGPACK_UINT32 => {
                let v = self.reader.read_u32()? as u64;
                self.consume();
                v
            }
            MSGPACK_UINT64 => {
                let v = self.reader.read_u64()?;
                self.consume();
                v
            }
            MSGPACK_INT8 => {
                let v = self.reader.read_u8()? as i8 as i64;
                self.consume();
                int_to_uint(v)?
            }
            MSGPACK_INT16 => {
                let v = self.reader.read_u16()? as i16 as i64;
                self.consume();
                int_to_uint(v)?
            }
            MSGPACK_INT32 => {
                let v = self.reader.read_u32()? as i32 as i64;
                self.consume();
                int_to_uint(v)?
            }
            MSGPACK_INT64 => {
                let v = self.reader.read_u64()? as i64;
                self.consume();
                int_to_uint(v)?
            }
            _ => return Err(self.mismatch("unsigned integer")),
        };
        check_uint_fits(value, bits)
    }

    fn decode_float(&mut self, check32: bool) -> Result<f64, DecodeError> {
        self.init_read_next()?;
        let value = match self.descriptor {
            MSGPACK_FLOAT32 => {
                let bits = self.reader.read_u32()?;
                self.consume();
                f32::from_bits(bits) as f64
            }
            MSGPACK_FLOAT64 => {
                let bits = self.reader.read_u64()?;
                self.consume();
                f64::from_bits(bits)
            }
            // Integers widen silently into float destinations.
            _ => match self.encoded_type {
                EncodedType::Uint => self.decode_uint(64)? as f64,
                EncodedType::Int => self.decode_int(64)? as f64,
                _ => return Err(self.mismatch("float")),
            },
        };
        if check32 {
            check_float32(value)
        } else {
            Ok(value)
        }
    }

    fn decode_bool(&mut self) -> Result<bool, DecodeError> {
        self.init_read_next()?;
        match self.descriptor {
            MSGPACK_FALSE => {
                self.consume();
                Ok(false)
            }
            MSGPACK_TRUE => {
                self.consume();
                Ok(true)
            }
            _ => Err(self.mismatch("bool")),
        }
    }

    fn decode_str(&mut self) -> Result<Cow<'de, str>, DecodeError> {
        self.init_read_next()?;
        let len = self.str_len()?;
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
        let len = match self.descriptor {
            MSGPACK_BIN8 => self.reader.read_u8()? as usize,
            MSGPACK_BIN16 => self.reader.read_u16()? as usize,
            MSGPACK_BIN32 => self.reader.read_u32()? as usize,
            // Strings decode into byte buffers as raw data.
            MSGPACK_FIXSTR_MIN..=MSGPACK_FIXSTR_MAX | MSGPACK_STR8 | MSGPACK_STR16
            | MSGPACK_STR32 => self.str_len()?,
            _ => return Err(self.mismatch("bytes")),
        };
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
        let len = match self.descriptor {
            MSGPACK_FIXMAP_MIN..=MSGPACK_FIXMAP_MAX => (self.descriptor & 0x0f) as usize,
            MSGPACK_MAP16 => self.reader.read_u16()? as usize,
            MSGPACK_MAP32 => self.reader.read_u32()? as usize,
            _ => return Err(self.mismatch("map")),
        };
        self.consume();
        Ok(len)
    }

    fn read_array_len(&mut self) -> Result<usize, DecodeError> {
        self.init_read_next()?;
        let len = match self.descriptor {
            MSGPACK_FIXARRAY_MIN..=MSGPACK_FIXARRAY_MAX => (self.descriptor & 0x0f) as usize,
            MSGPACK_ARRAY16 => self.reader.read_u16()? as usize,
            MSGPACK_ARRAY32 => self.reader.read_u32()? as usize,
            _ => return Err(self.mismatch("array")),
        };
        self.consume();
        Ok(len)
    }
}
