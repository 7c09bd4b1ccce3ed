//! Bytes ⇄ value codec (§4.3): a UTF-8 string fast path that interoperates
//! with any memcached client, a tagged bincode fallback for everything else,
//! and an optional gzip wrapper above a configurable threshold.

use crate::error::Error;
use serde::{de::DeserializeOwned, Serialize};

/// Payload is gzip-compressed.
pub const F_COMPRESSED: u32 = 2;
/// Payload is the crate's tagged binary serialization, not plain UTF-8.
pub const F_SERIALIZED: u32 = 8;

/// The flag bits carried alongside a stored value, mirroring what the wire
/// protocol calls `<flags>` in a `set`/`VALUE` line. Other bits are
/// reserved and preserved on round-trip (§6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(pub u32);

impl Flags {
    pub fn is_compressed(self) -> bool {
        self.0 & F_COMPRESSED != 0
    }

    pub fn is_serialized(self) -> bool {
        self.0 & F_SERIALIZED != 0
    }

    pub fn with_compressed(self) -> Self {
        Flags(self.0 | F_COMPRESSED)
    }

    pub fn with_serialized(self) -> Self {
        Flags(self.0 | F_SERIALIZED)
    }
}

impl From<u32> for Flags {
    fn from(bits: u32) -> Self {
        Flags(bits)
    }
}

/// Compression behavior for [`encode`]/[`decode`].
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    pub compress_enable: bool,
    pub compress_threshold: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compress_enable: true,
            compress_threshold: 15360,
        }
    }
}

/// Marker for values that should take the interoperable UTF-8 string fast
/// path instead of the tagged binary serialization. Implemented for the
/// primitive/string kinds the original format also special-cased.
pub trait TextEncodable {
    fn as_text(&self) -> Option<&str>;
}

impl TextEncodable for str {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl TextEncodable for String {
    fn as_text(&self) -> Option<&str> {
        Some(self.as_str())
    }
}

/// Encode `value` per §4.3: UTF-8 text with `flags = 0` for string-like
/// values, otherwise a tagged bincode serialization with `F_SERIALIZED`
/// set. If compression is enabled and the encoded length exceeds
/// `threshold`, the bytes are gzipped and `F_COMPRESSED` is set.
pub fn encode<V>(value: &V, config: CodecConfig) -> Result<(Vec<u8>, Flags), Error>
where
    V: Serialize + TextEncodable + ?Sized,
{
    let (mut bytes, mut flags) = match value.as_text() {
        Some(text) => (text.as_bytes().to_vec(), Flags(0)),
        None => (bincode::serialize(value)?, Flags(0).with_serialized()),
    };

    if config.compress_enable && bytes.len() > config.compress_threshold {
        bytes = gzip(&bytes)?;
        flags = flags.with_compressed();
    }

    Ok((bytes, flags))
}

/// Encode a value that never takes the text fast path (always tagged
/// binary), for callers that don't want to implement [`TextEncodable`].
pub fn encode_opaque<V: Serialize + ?Sized>(
    value: &V,
    config: CodecConfig,
) -> Result<(Vec<u8>, Flags), Error> {
    let mut bytes = bincode::serialize(value)?;
    let mut flags = Flags(0).with_serialized();
    if config.compress_enable && bytes.len() > config.compress_threshold {
        bytes = gzip(&bytes)?;
        flags = flags.with_compressed();
    }
    Ok((bytes, flags))
}

/// Encode a 64-bit counter as its ASCII decimal representation with
/// `flags = 0`, so the server's own `incr`/`decr` can operate on it (§4.3).
pub fn encode_counter(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Decode a tagged, serialized value per §4.3: gunzip first if
/// `F_COMPRESSED`, then deserialize with the tagged binary form. Values
/// stored as plain UTF-8 text (`F_SERIALIZED` unset, e.g. by another
/// memcached client) aren't valid input for an arbitrary `V` here; use
/// [`decode_string`] for those.
pub fn decode<V: DeserializeOwned>(bytes: &[u8], flags: Flags) -> Result<V, Error> {
    let bytes = if flags.is_compressed() {
        gunzip(bytes)?
    } else {
        bytes.to_vec()
    };

    if flags.is_serialized() {
        Ok(bincode::deserialize(&bytes)?)
    } else {
        Err(crate::error::ProtocolError::Malformed(
            "value has no F_SERIALIZED flag; decode as a string instead".into(),
        )
        .into())
    }
}

/// Decode a value known to be a plain UTF-8 string (the common case for
/// `get`), without requiring `V: DeserializeOwned` machinery.
pub fn decode_string(bytes: &[u8], flags: Flags) -> Result<String, Error> {
    let bytes = if flags.is_compressed() {
        gunzip(bytes)?
    } else {
        bytes.to_vec()
    };
    if flags.is_serialized() {
        Ok(bincode::deserialize(&bytes)?)
    } else {
        String::from_utf8(bytes)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }
}

#[cfg(feature = "gzip")]
fn gzip(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes)?;
    Ok(enc.finish()?)
}

#[cfg(feature = "gzip")]
fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, Error> {
    use flate2::write::GzDecoder;
    use std::io::Write;

    let mut dec = GzDecoder::new(Vec::new());
    dec.write_all(bytes)?;
    Ok(dec.finish()?)
}

#[cfg(not(feature = "gzip"))]
fn gzip(_bytes: &[u8]) -> Result<Vec<u8>, Error> {
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "gzip compression requested but the `gzip` feature is disabled",
    )))
}

#[cfg(not(feature = "gzip"))]
fn gunzip(_bytes: &[u8]) -> Result<Vec<u8>, Error> {
    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "gzip decompression requested but the `gzip` feature is disabled",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_string(value: &str, threshold: usize) -> (Vec<u8>, Flags) {
        let config = CodecConfig {
            compress_enable: true,
            compress_threshold: threshold,
        };
        encode(value, config).unwrap()
    }

    #[test]
    fn test_small_string_is_uncompressed_plain_text() {
        let (bytes, flags) = roundtrip_string("hello", 64);
        assert_eq!(b"hello", &bytes[..]);
        assert_eq!(Flags(0), flags);
        assert_eq!("hello", decode_string(&bytes, flags).unwrap());
    }

    #[test]
    fn test_large_string_is_compressed() {
        let value = "x".repeat(1024);
        let (bytes, flags) = roundtrip_string(&value, 64);
        assert!(flags.is_compressed());
        assert!(bytes.len() < value.len());
        assert_eq!(value, decode_string(&bytes, flags).unwrap());
    }

    #[test]
    fn test_opaque_value_is_tagged_serialized() {
        #[derive(serde_derive::Serialize, serde_derive::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
            y: i32,
        }
        let point = Point { x: 1, y: 2 };
        let config = CodecConfig {
            compress_enable: false,
            compress_threshold: 15360,
        };
        let (bytes, flags) = encode_opaque(&point, config).unwrap();
        assert!(flags.is_serialized());
        assert!(!flags.is_compressed());
        let decoded: Point = decode(&bytes, flags).unwrap();
        assert_eq!(point, decoded);
    }

    #[test]
    fn test_counter_encoding_is_plain_decimal() {
        assert_eq!(b"106".to_vec(), encode_counter(106));
    }

    #[test]
    fn test_roundtrip_below_threshold_is_uncompressed() {
        let value = "y".repeat(32);
        let (bytes, flags) = roundtrip_string(&value, 64);
        assert!(!flags.is_compressed());
        assert_eq!(value, decode_string(&bytes, flags).unwrap());
    }
}
