//! PackStream marker bytes.
//!
//! Every encoded value starts with a marker. Small strings, lists, maps and
//! structures fold their size into the low nibble of the marker.

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

pub const TINY_STRING: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

pub const TINY_LIST: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;

pub const TINY_MAP: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;

pub const TINY_STRUCT: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

/// Largest size that fits in a tiny marker nibble.
pub const TINY_MAX: usize = 0x0F;

/// Smallest value encoded inline as a tiny int.
pub const TINY_INT_MIN: i64 = -16;
/// Largest value encoded inline as a tiny int.
pub const TINY_INT_MAX: i64 = 127;

/// Family of a marker byte, with the inline size when the marker carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    TinyInt(i8),
    TinyString(usize),
    TinyList(usize),
    TinyMap(usize),
    TinyStruct(usize),
    Other(u8),
}

/// Classify a marker byte.
pub fn classify(marker: u8) -> MarkerKind {
    match marker {
        0x00..=0x7F | 0xF0..=0xFF => MarkerKind::TinyInt(marker as i8),
        0x80..=0x8F => MarkerKind::TinyString((marker & 0x0F) as usize),
        0x90..=0x9F => MarkerKind::TinyList((marker & 0x0F) as usize),
        0xA0..=0xAF => MarkerKind::TinyMap((marker & 0x0F) as usize),
        0xB0..=0xBF => MarkerKind::TinyStruct((marker & 0x0F) as usize),
        other => MarkerKind::Other(other),
    }
}
