//! Binary transport for partial results, broadcast frames and snapshots.
//!
//! Payloads are a six-byte header (magic `DFMR` + little-endian `u16` version) followed by the
//! [`bincode`] encoding of the value: varint integers, little-endian floats, length-prefixed
//! sequences. Any `Serialize + DeserializeOwned` type is [`Wire`]. Decoding is bounded by the
//! payload size, so a corrupt length prefix cannot ask for more memory than the buffer describes.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const WIRE_MAGIC: [u8; 4] = *b"DFMR";
pub const WIRE_VERSION: u16 = 1;

const HEADER_LEN: usize = WIRE_MAGIC.len() + 2;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of payload")]
    UnexpectedEof,

    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid tag {0}")]
    InvalidTag(u64),

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    #[error("length prefix runs past the end of the payload")]
    SizeLimit,

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    /// Well-formed bytes describing an invalid value, e.g. a repeated key or a chunk that does
    /// not match its frame's layout.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                CodecError::UnexpectedEof
            }
            bincode::ErrorKind::InvalidTagEncoding(tag) => CodecError::InvalidTag(tag as u64),
            bincode::ErrorKind::InvalidBoolEncoding(tag) => CodecError::InvalidTag(tag.into()),
            bincode::ErrorKind::InvalidUtf8Encoding(_) => CodecError::InvalidUtf8,
            bincode::ErrorKind::SizeLimit => CodecError::SizeLimit,
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

/// Types that can cross node boundaries.
pub trait Wire: Serialize + DeserializeOwned {
    /// Header-framed standalone payload.
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.extend_from_slice(&WIRE_MAGIC);
        bytes.extend_from_slice(&WIRE_VERSION.to_le_bytes());
        bincode::DefaultOptions::new().serialize_into(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Inverse of [`Wire::to_bytes`]; the whole buffer must be consumed.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut body = read_header(bytes)?;
        let value = bincode::DefaultOptions::new()
            .with_limit(body.len() as u64)
            .deserialize_from(&mut body)?;
        match body.len() {
            0 => Ok(value),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

impl<T: Serialize + DeserializeOwned> Wire for T {}

/// Check the header and return the body that follows it.
fn read_header(bytes: &[u8]) -> Result<&[u8], CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::UnexpectedEof);
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[..4]);
    if magic != WIRE_MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dframe_columnar::Value;
    use std::sync::Arc;

    #[test]
    fn header_is_checked() {
        assert_eq!(
            Value::from_bytes(b"NOPE\x01\x00\x00"),
            Err(CodecError::BadMagic(*b"NOPE"))
        );
        assert_eq!(Value::from_bytes(b"DFMR"), Err(CodecError::UnexpectedEof));

        let mut bytes = Value::Null.to_bytes().unwrap();
        bytes[4..6].copy_from_slice(&(WIRE_VERSION + 1).to_le_bytes());
        assert_eq!(
            Value::from_bytes(&bytes),
            Err(CodecError::UnsupportedVersion(WIRE_VERSION + 1))
        );
    }

    #[test]
    fn huge_lengths_fail_before_allocating() {
        let bytes = (usize::MAX / 2).to_bytes().unwrap();
        assert_eq!(String::from_bytes(&bytes), Err(CodecError::SizeLimit));
        assert!(Vec::<u64>::from_bytes(&bytes).is_err());
    }

    #[test]
    fn values_roundtrip() {
        let values = [
            Value::Null,
            Value::Number(-0.25),
            Value::Integer(i64::MIN),
            Value::Text(Arc::from("héllo")),
        ];
        for value in values {
            assert_eq!(Value::from_bytes(&value.to_bytes().unwrap()).unwrap(), value);
        }
    }

    #[test]
    fn bad_tags_and_trailing_bytes_are_rejected() {
        let mut bytes = Value::Null.to_bytes().unwrap();
        bytes.push(0);
        assert_eq!(Value::from_bytes(&bytes), Err(CodecError::TrailingBytes(1)));

        let bytes = 2u8.to_bytes().unwrap();
        assert_eq!(Option::<u8>::from_bytes(&bytes), Err(CodecError::InvalidTag(2)));
        assert!(matches!(
            Value::from_bytes(&9u32.to_bytes().unwrap()),
            Err(CodecError::Malformed(_))
        ));
    }
}
