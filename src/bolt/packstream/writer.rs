//! PackStream writer.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use super::marker::*;
use super::value::{Structure, Value};
use super::PackStreamError;

/// Writes PackStream values into a caller-owned buffer.
pub struct PackStreamWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> PackStreamWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    pub fn write(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => self.write_null(),
            Value::Boolean(b) => self.write_bool(*b),
            Value::Integer(i) => self.write_int(*i),
            Value::Float(f) => self.write_float(*f),
            Value::Bytes(b) => return self.write_bytes(b),
            Value::String(s) => return self.write_string(s),
            Value::List(items) => return self.write_list(items),
            Value::Map(map) => return self.write_map(map),
            Value::Structure(s) => return self.write_structure(s),
        }
        Ok(())
    }

    pub fn write_null(&mut self) {
        self.buf.put_u8(NULL);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(if value { TRUE } else { FALSE });
    }

    /// Integers always take the narrowest encoding.
    pub fn write_int(&mut self, value: i64) {
        if (TINY_INT_MIN..=TINY_INT_MAX).contains(&value) {
            self.buf.put_i8(value as i8);
        } else if let Ok(v) = i8::try_from(value) {
            self.buf.put_u8(INT_8);
            self.buf.put_i8(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.buf.put_u8(INT_16);
            self.buf.put_i16(v);
        } else if let Ok(v) = i32::try_from(value) {
            self.buf.put_u8(INT_32);
            self.buf.put_i32(v);
        } else {
            self.buf.put_u8(INT_64);
            self.buf.put_i64(value);
        }
    }

    pub fn write_float(&mut self, value: f64) {
        self.buf.put_u8(FLOAT_64);
        self.buf.put_f64(value);
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        let len = value.len();
        if len <= u8::MAX as usize {
            self.buf.put_u8(BYTES_8);
            self.buf.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(BYTES_16);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(BYTES_32);
            self.buf.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge("Bytes", len));
        }
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        self.write_sized_header(value.len(), TINY_STRING, [STRING_8, STRING_16, STRING_32], "String")?;
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_list(&mut self, items: &[Value]) -> Result<(), PackStreamError> {
        self.write_list_header(items.len())?;
        for item in items {
            self.write(item)?;
        }
        Ok(())
    }

    pub fn write_list_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.write_sized_header(len, TINY_LIST, [LIST_8, LIST_16, LIST_32], "List")
    }

    pub fn write_map(&mut self, map: &HashMap<String, Value>) -> Result<(), PackStreamError> {
        self.write_map_header(map.len())?;
        for (key, value) in map {
            self.write_string(key)?;
            self.write(value)?;
        }
        Ok(())
    }

    pub fn write_map_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.write_sized_header(len, TINY_MAP, [MAP_8, MAP_16, MAP_32], "Map")
    }

    pub fn write_structure(&mut self, s: &Structure) -> Result<(), PackStreamError> {
        self.write_struct_header(s.tag, s.fields.len())?;
        for field in &s.fields {
            self.write(field)?;
        }
        Ok(())
    }

    pub fn write_struct_header(&mut self, tag: u8, fields: usize) -> Result<(), PackStreamError> {
        if fields <= TINY_MAX {
            self.buf.put_u8(TINY_STRUCT | fields as u8);
        } else if fields <= u8::MAX as usize {
            self.buf.put_u8(STRUCT_8);
            self.buf.put_u8(fields as u8);
        } else if fields <= u16::MAX as usize {
            self.buf.put_u8(STRUCT_16);
            self.buf.put_u16(fields as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge("Structure", fields));
        }
        self.buf.put_u8(tag);
        Ok(())
    }

    fn write_sized_header(
        &mut self,
        len: usize,
        tiny: u8,
        sized: [u8; 3],
        kind: &'static str,
    ) -> Result<(), PackStreamError> {
        if len <= TINY_MAX {
            self.buf.put_u8(tiny | len as u8);
        } else if len <= u8::MAX as usize {
            self.buf.put_u8(sized[0]);
            self.buf.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buf.put_u8(sized[1]);
            self.buf.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buf.put_u8(sized[2]);
            self.buf.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(kind, len));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(value: &Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        PackStreamWriter::new(&mut buf).write(value).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_int_widths() {
        assert_eq!(packed(&Value::Integer(1)), vec![0x01]);
        assert_eq!(packed(&Value::Integer(-16)), vec![0xF0]);
        assert_eq!(packed(&Value::Integer(-17)), vec![INT_8, 0xEF]);
        assert_eq!(packed(&Value::Integer(128)), vec![INT_16, 0x00, 0x80]);
        assert_eq!(packed(&Value::Integer(40_000)), vec![INT_32, 0x00, 0x00, 0x9C, 0x40]);
        assert_eq!(packed(&Value::Integer(i64::MAX))[0], INT_64);
    }

    #[test]
    fn test_string_headers() {
        assert_eq!(packed(&Value::from("")), vec![0x80]);
        assert_eq!(packed(&Value::from("abc")), vec![0x83, b'a', b'b', b'c']);
        let long = "x".repeat(16);
        assert_eq!(&packed(&Value::from(long.as_str()))[..2], &[STRING_8, 16]);
    }

    #[test]
    fn test_structure_header() {
        let s = Structure::new(0x70, vec![Value::Map(HashMap::new())]);
        assert_eq!(packed(&Value::Structure(s)), vec![0xB1, 0x70, 0xA0]);
    }

    #[test]
    fn test_float_is_always_64_bit() {
        let bytes = packed(&Value::Float(1.5));
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], FLOAT_64);
    }
}
