//! PackStream serialization.
//!
//! PackStream is the self-describing binary encoding carried inside Bolt
//! chunks. It covers null, booleans, 64-bit integers and floats, strings,
//! byte arrays, lists, string-keyed maps, and tagged structures.
//!
//! Integers are written in their narrowest form. Strings, lists and maps
//! of up to 15 entries fold their size into the marker byte.

pub mod marker;
pub mod reader;
pub mod structures;
pub mod value;
pub mod writer;

pub use reader::PackStreamReader;
pub use structures::{
    tag, Date, DateTimeEncoding, Duration, LocalDateTime, Node, Path, Point, Relationship, Zone,
    ZonedDateTime,
};
pub use value::{Structure, Value};
pub use writer::PackStreamWriter;

use std::fmt;

use bytes::BytesMut;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended inside a value
    UnexpectedEof,
    /// Marker byte outside the PackStream table
    UnknownMarker(u8),
    InvalidUtf8(String),
    /// Map keys must be strings
    InvalidMapKey,
    /// Size does not fit any length prefix
    ValueTooLarge(&'static str, usize),
    InvalidStructure(String),
    /// Lists, maps and structures nested past the reader's limit
    NestingTooDeep(usize),
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => write!(f, "Unknown PackStream marker: 0x{:02X}", m),
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::InvalidMapKey => write!(f, "Map keys must be strings"),
            PackStreamError::ValueTooLarge(kind, size) => write!(f, "{} too large: {}", kind, size),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::NestingTooDeep(limit) => {
                write!(f, "Values nested deeper than {} levels", limit)
            }
        }
    }
}

impl std::error::Error for PackStreamError {}

/// Pack a single value into a fresh buffer.
pub fn pack(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut buf = BytesMut::with_capacity(128);
    PackStreamWriter::new(&mut buf).write(value)?;
    Ok(buf)
}

/// Unpack exactly one value. Trailing bytes are an error.
pub fn unpack(data: &[u8]) -> Result<Value, PackStreamError> {
    let mut reader = PackStreamReader::new(data);
    let value = reader.read()?;
    if reader.remaining() > 0 {
        return Err(PackStreamError::InvalidStructure(format!(
            "{} trailing bytes after value",
            reader.remaining()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_pack_unpack_message_shape() {
        let mut meta = HashMap::new();
        meta.insert("fields".to_string(), Value::from(vec!["n".to_string()]));
        meta.insert("t_first".to_string(), Value::Integer(12));
        let msg = Value::Structure(Structure::new(0x70, vec![Value::Map(meta)]));

        let bytes = pack(&msg).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_large_collections_cross_tiny_boundary() {
        let list: Vec<Value> = (0..300).map(Value::Integer).collect();
        let bytes = pack(&Value::List(list.clone())).unwrap();
        assert_eq!(bytes[0], marker::LIST_16);
        assert_eq!(unpack(&bytes).unwrap(), Value::List(list));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        assert!(unpack(&[0xC0, 0xC0]).is_err());
    }
}
