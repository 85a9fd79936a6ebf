//! The decode-side error surface.
//!
//! Every failure anywhere in the recursive descent is threaded back to the
//! top-level `decode` call as one of these values; there is no retry inside
//! the engine. Messages carry the `codec.decoder:` tag so callers can grep a
//! mixed log for decode failures.

use core::fmt;

use imbue_core::ShapeError;

use crate::driver::EncodedType;

/// A decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The byte source was empty at the start of a read.
    #[error("codec.decoder: unexpected end of input")]
    Eof,

    /// The byte source held fewer bytes than a read required.
    #[error("codec.decoder: wanted {requested} bytes but only {available} remain")]
    ShortRead {
        /// Bytes the read asked for.
        requested: usize,
        /// Bytes left in the source.
        available: usize,
    },

    /// The stream-backed byte source failed.
    #[error("codec.decoder: read failed")]
    Io(#[from] std::io::Error),

    /// The driver saw a header byte its format does not define.
    #[error("codec.decoder: unrecognized descriptor byte 0x{descriptor:02x}")]
    BadDescriptor {
        /// The offending byte.
        descriptor: u8,
    },

    /// The current stream item has the wrong wire type for the requested
    /// read.
    #[error("codec.decoder: expected {expected}, stream has {found}")]
    Mismatch {
        /// What the destination required.
        expected: &'static str,
        /// What the stream held.
        found: EncodedType,
    },

    /// Numeric narrowing lost magnitude.
    #[error("codec.decoder: value {value} overflows {target}")]
    Overflow {
        /// The out-of-range value, formatted.
        value: String,
        /// The narrow target type.
        target: &'static str,
    },

    /// A struct destination met a stream item that is neither map nor array.
    #[error("codec.decoder: only an encoded map or array decodes into a struct, stream has {found}")]
    StructShapeMismatch {
        /// What the stream held.
        found: EncodedType,
    },

    /// The stream held more elements than a fixed-length destination can take.
    #[error("codec.decoder: cannot grow sequence of fixed length {len} to {needed} stream elements")]
    CannotGrow {
        /// The destination's fixed length.
        len: usize,
        /// Elements the stream carried.
        needed: usize,
    },

    /// Strict mode and a stream map key matched no struct field.
    #[error("codec.decoder: no field in `{type_name}` matches stream map key `{field}`")]
    UnknownField {
        /// The destination struct.
        type_name: &'static str,
        /// The unmatched key.
        field: String,
    },

    /// The extension tag in the stream is not the registered one.
    #[error("codec.decoder: extension tag mismatch: registered {expected}, stream has {found}")]
    ExtensionTagMismatch {
        /// The tag the plan recorded at registration.
        expected: u8,
        /// The tag the stream carried.
        found: u8,
    },

    /// A user-supplied converter (extension or binary-unmarshal) failed.
    #[error("codec.decoder: user converter failed")]
    UserConverter(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The destination has a kind the engine cannot decode.
    #[error("codec.decoder: cannot decode into destination `{type_name}`")]
    UnsupportedKind {
        /// The destination type.
        type_name: &'static str,
    },

    /// An encoded string was not valid UTF-8.
    #[error("codec.decoder: invalid utf-8 in encoded string")]
    InvalidUtf8,

    /// Deriving type metadata for the destination failed.
    #[error("codec.decoder: {0}")]
    Shape(#[from] ShapeError),

    /// An engine invariant did not hold; always a bug.
    #[error("codec.decoder: internal invariant violated: {0}")]
    Internal(&'static str),
}

impl miette::Diagnostic for DecodeError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code = match self {
            DecodeError::Eof => "imbue::decode::eof",
            DecodeError::ShortRead { .. } => "imbue::decode::short_read",
            DecodeError::Io(_) => "imbue::decode::io",
            DecodeError::BadDescriptor { .. } => "imbue::decode::bad_descriptor",
            DecodeError::Mismatch { .. } => "imbue::decode::mismatch",
            DecodeError::Overflow { .. } => "imbue::decode::overflow",
            DecodeError::StructShapeMismatch { .. } => "imbue::decode::struct_shape",
            DecodeError::CannotGrow { .. } => "imbue::decode::cannot_grow",
            DecodeError::UnknownField { .. } => "imbue::decode::unknown_field",
            DecodeError::ExtensionTagMismatch { .. } => "imbue::decode::ext_tag",
            DecodeError::UserConverter(_) => "imbue::decode::user_converter",
            DecodeError::UnsupportedKind { .. } => "imbue::decode::unsupported_kind",
            DecodeError::InvalidUtf8 => "imbue::decode::utf8",
            DecodeError::Shape(_) => "imbue::decode::shape",
            DecodeError::Internal(_) => "imbue::decode::internal",
        };
        Some(Box::new(code))
    }
}

/// A failure while registering an extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// Tag 0 is reserved and never assigned.
    #[error("extension tag 0 is reserved")]
    ReservedTag,

    /// Another extension already claimed the tag.
    #[error("extension tag {tag} is already registered")]
    DuplicateTag {
        /// The contested tag.
        tag: u8,
    },

    /// The type already has an extension.
    #[error("an extension is already registered for `{type_name}`")]
    DuplicateType {
        /// The contested type.
        type_name: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_decoder_tag() {
        let errors: Vec<DecodeError> = vec![
            DecodeError::Eof,
            DecodeError::ShortRead {
                requested: 4,
                available: 1,
            },
            DecodeError::BadDescriptor { descriptor: 0xc1 },
            DecodeError::Overflow {
                value: "1099511627776".into(),
                target: "i32",
            },
            DecodeError::UnknownField {
                type_name: "Record",
                field: "bogus".into(),
            },
        ];
        for err in errors {
            assert!(err.to_string().starts_with("codec.decoder: "), "{err}");
        }
    }

    #[test]
    fn diagnostic_codes_are_stable() {
        use miette::Diagnostic;
        let err = DecodeError::Eof;
        assert_eq!(err.code().unwrap().to_string(), "imbue::decode::eof");
    }
}
