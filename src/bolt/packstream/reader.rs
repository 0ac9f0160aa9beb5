//! PackStream reader.

use std::collections::HashMap;

use bytes::Buf;

use super::marker::*;
use super::value::{Structure, Value};
use super::PackStreamError;

/// Deepest nesting of lists, maps and structures the reader accepts.
pub const MAX_DEPTH: usize = 64;

/// Reads PackStream values from a byte slice.
pub struct PackStreamReader<'a> {
    data: &'a [u8],
    depth: usize,
}

impl<'a> PackStreamReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, depth: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn read(&mut self) -> Result<Value, PackStreamError> {
        let marker = self.take_u8()?;
        match classify(marker) {
            MarkerKind::TinyInt(v) => Ok(Value::Integer(v as i64)),
            MarkerKind::TinyString(len) => self.read_string_body(len),
            MarkerKind::TinyList(len) => self.read_list_body(len),
            MarkerKind::TinyMap(len) => self.read_map_body(len),
            MarkerKind::TinyStruct(len) => self.read_struct_body(len),
            MarkerKind::Other(marker) => self.read_marked(marker),
        }
    }

    /// Read a structure header, returning `(field_count, tag)`.
    pub fn read_struct_header(&mut self) -> Result<(usize, u8), PackStreamError> {
        let marker = self.take_u8()?;
        let len = match classify(marker) {
            MarkerKind::TinyStruct(len) => len,
            MarkerKind::Other(STRUCT_8) => self.take_u8()? as usize,
            MarkerKind::Other(STRUCT_16) => self.take_u16()? as usize,
            _ => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "expected a structure, found marker 0x{:02X}",
                    marker
                )))
            }
        };
        let tag = self.take_u8()?;
        Ok((len, tag))
    }

    fn read_marked(&mut self, marker: u8) -> Result<Value, PackStreamError> {
        match marker {
            NULL => Ok(Value::Null),
            TRUE => Ok(Value::Boolean(true)),
            FALSE => Ok(Value::Boolean(false)),
            FLOAT_64 => {
                self.need(8)?;
                Ok(Value::Float(self.data.get_f64()))
            }
            INT_8 => {
                self.need(1)?;
                Ok(Value::Integer(self.data.get_i8() as i64))
            }
            INT_16 => {
                self.need(2)?;
                Ok(Value::Integer(self.data.get_i16() as i64))
            }
            INT_32 => {
                self.need(4)?;
                Ok(Value::Integer(self.data.get_i32() as i64))
            }
            INT_64 => {
                self.need(8)?;
                Ok(Value::Integer(self.data.get_i64()))
            }
            BYTES_8 | BYTES_16 | BYTES_32 => {
                let len = self.read_len(marker - BYTES_8)?;
                self.need(len)?;
                let bytes = self.data[..len].to_vec();
                self.data.advance(len);
                Ok(Value::Bytes(bytes))
            }
            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.read_len(marker - STRING_8)?;
                self.read_string_body(len)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.read_len(marker - LIST_8)?;
                self.read_list_body(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.read_len(marker - MAP_8)?;
                self.read_map_body(len)
            }
            STRUCT_8 => {
                let len = self.take_u8()? as usize;
                self.read_struct_body(len)
            }
            STRUCT_16 => {
                let len = self.take_u16()? as usize;
                self.read_struct_body(len)
            }
            other => Err(PackStreamError::UnknownMarker(other)),
        }
    }

    /// Width 0, 1, 2 selects a u8, u16 or u32 length prefix.
    fn read_len(&mut self, width: u8) -> Result<usize, PackStreamError> {
        match width {
            0 => Ok(self.take_u8()? as usize),
            1 => Ok(self.take_u16()? as usize),
            _ => {
                self.need(4)?;
                Ok(self.data.get_u32() as usize)
            }
        }
    }

    fn read_string_body(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.need(len)?;
        let s = std::str::from_utf8(&self.data[..len])
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?
            .to_string();
        self.data.advance(len);
        Ok(Value::String(s))
    }

    /// Run `body` one nesting level down.
    fn nested<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, PackStreamError>,
    ) -> Result<T, PackStreamError> {
        if self.depth >= MAX_DEPTH {
            return Err(PackStreamError::NestingTooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = body(self);
        self.depth -= 1;
        result
    }

    fn read_list_body(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.nested(|r| {
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(r.read()?);
            }
            Ok(Value::List(items))
        })
    }

    fn read_map_body(&mut self, len: usize) -> Result<Value, PackStreamError> {
        self.nested(|r| {
            let mut map = HashMap::with_capacity(len.min(1024));
            for _ in 0..len {
                let key = match r.read()? {
                    Value::String(s) => s,
                    _ => return Err(PackStreamError::InvalidMapKey),
                };
                let value = r.read()?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        })
    }

    fn read_struct_body(&mut self, len: usize) -> Result<Value, PackStreamError> {
        let tag = self.take_u8()?;
        self.nested(|r| {
            let mut fields = Vec::with_capacity(len);
            for _ in 0..len {
                fields.push(r.read()?);
            }
            Ok(Value::Structure(Structure::new(tag, fields)))
        })
    }

    fn take_u8(&mut self) -> Result<u8, PackStreamError> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn take_u16(&mut self) -> Result<u16, PackStreamError> {
        self.need(2)?;
        Ok(self.data.get_u16())
    }

    fn need(&self, n: usize) -> Result<(), PackStreamError> {
        if self.data.len() < n {
            Err(PackStreamError::UnexpectedEof)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_scalars() {
        let mut r = PackStreamReader::new(&[0xC0, 0xC3, 0xF0, INT_16, 0x01, 0x00]);
        assert_eq!(r.read().unwrap(), Value::Null);
        assert_eq!(r.read().unwrap(), Value::Boolean(true));
        assert_eq!(r.read().unwrap(), Value::Integer(-16));
        assert_eq!(r.read().unwrap(), Value::Integer(256));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_read_nested_map() {
        // {"a": [1, "x"]}
        let bytes = [0xA1, 0x81, b'a', 0x92, 0x01, 0x81, b'x'];
        let value = PackStreamReader::new(&bytes).read().unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(
            map["a"],
            Value::List(vec![Value::Integer(1), Value::from("x")])
        );
    }

    #[test]
    fn test_truncated_input() {
        let err = PackStreamReader::new(&[STRING_8, 5, b'a']).read().unwrap_err();
        assert!(matches!(err, PackStreamError::UnexpectedEof));
    }

    #[test]
    fn test_non_string_map_key() {
        let err = PackStreamReader::new(&[0xA1, 0x01, 0x01]).read().unwrap_err();
        assert!(matches!(err, PackStreamError::InvalidMapKey));
    }

    #[test]
    fn test_unknown_marker() {
        let err = PackStreamReader::new(&[0xC7]).read().unwrap_err();
        assert!(matches!(err, PackStreamError::UnknownMarker(0xC7)));
    }

    #[test]
    fn test_nesting_limit() {
        // [[[...1...]]] with MAX_DEPTH lists is fine, one more is rejected
        let nested = |depth: usize| {
            let mut bytes = vec![0x91; depth];
            bytes.push(0x01);
            bytes
        };
        assert!(PackStreamReader::new(&nested(MAX_DEPTH)).read().is_ok());

        let err = PackStreamReader::new(&nested(MAX_DEPTH + 1)).read().unwrap_err();
        assert_eq!(err, PackStreamError::NestingTooDeep(MAX_DEPTH));
        assert!(crate::bolt::BoltError::from(err).is_protocol_violation());

        // a deep structure chain without any payload
        let mut bytes = Vec::new();
        for _ in 0..10_000 {
            bytes.extend_from_slice(&[0xB1, 0x4E]);
        }
        assert!(PackStreamReader::new(&bytes).read().is_err());
    }

    #[test]
    fn test_struct_header() {
        let mut r = PackStreamReader::new(&[0xB1, 0x71, 0x90]);
        assert_eq!(r.read_struct_header().unwrap(), (1, 0x71));
        assert_eq!(r.read().unwrap(), Value::List(vec![]));
    }
}
