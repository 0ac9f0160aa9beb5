//! Typed views over graph, temporal and spatial structures.
//!
//! Values arrive from the server as raw [`Structure`]s. The types here
//! read them by tag and field position. Date-times have two wire dialects:
//! the legacy one carries wall-clock seconds, the UTC one (Bolt 5, or 4.x
//! with the `utc` patch) carries seconds since the epoch in UTC.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

use super::value::{Structure, Value};
use super::PackStreamError;

/// Structure tags.
pub mod tag {
    pub const NODE: u8 = 0x4E;
    pub const RELATIONSHIP: u8 = 0x52;
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub const PATH: u8 = 0x50;

    pub const DATE: u8 = 0x44;
    pub const TIME: u8 = 0x54;
    pub const LOCAL_TIME: u8 = 0x74;
    pub const LOCAL_DATE_TIME: u8 = 0x64;
    pub const DURATION: u8 = 0x45;

    pub const LEGACY_DATE_TIME: u8 = 0x46;
    pub const LEGACY_DATE_TIME_ZONE_ID: u8 = 0x66;
    pub const DATE_TIME: u8 = 0x49;
    pub const DATE_TIME_ZONE_ID: u8 = 0x69;

    pub const POINT_2D: u8 = 0x58;
    pub const POINT_3D: u8 = 0x59;
}

/// Which date-time dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeEncoding {
    #[default]
    Legacy,
    Utc,
}

impl DateTimeEncoding {
    /// Whether a date-time structure tag belongs to this dialect.
    /// Non date-time tags are always accepted.
    pub fn accepts(self, structure_tag: u8) -> bool {
        match (self, structure_tag) {
            (DateTimeEncoding::Legacy, tag::DATE_TIME | tag::DATE_TIME_ZONE_ID) => false,
            (DateTimeEncoding::Utc, tag::LEGACY_DATE_TIME | tag::LEGACY_DATE_TIME_ZONE_ID) => false,
            _ => true,
        }
    }

    /// Recursively rewrite date-times inside `value` into this dialect.
    pub fn adapt(self, value: &mut Value) -> Result<(), PackStreamError> {
        match value {
            Value::List(items) => items.iter_mut().try_for_each(|v| self.adapt(v)),
            Value::Map(map) => map.values_mut().try_for_each(|v| self.adapt(v)),
            Value::Structure(s) if ZonedDateTime::is_date_time_tag(s.tag) => {
                if !self.accepts(s.tag) {
                    let dt = ZonedDateTime::from_structure(s)?;
                    *s = dt.to_structure(self)?;
                }
                Ok(())
            }
            Value::Structure(s) => s.fields.iter_mut().try_for_each(|v| self.adapt(v)),
            _ => Ok(()),
        }
    }

    /// Find the first structure tag inside `value` this dialect does not accept.
    pub fn first_foreign_tag(self, value: &Value) -> Option<u8> {
        match value {
            Value::List(items) => items.iter().find_map(|v| self.first_foreign_tag(v)),
            Value::Map(map) => map.values().find_map(|v| self.first_foreign_tag(v)),
            Value::Structure(s) if !self.accepts(s.tag) => Some(s.tag),
            Value::Structure(s) => s.fields.iter().find_map(|v| self.first_foreign_tag(v)),
            _ => None,
        }
    }
}

fn expect_tag(s: &Structure, tag: u8, name: &str, min_fields: usize) -> Result<(), PackStreamError> {
    if s.tag != tag {
        return Err(PackStreamError::InvalidStructure(format!(
            "expected {} (0x{:02X}), found tag 0x{:02X}",
            name, tag, s.tag
        )));
    }
    if s.fields.len() < min_fields {
        return Err(PackStreamError::InvalidStructure(format!(
            "{} needs {} fields, found {}",
            name,
            min_fields,
            s.fields.len()
        )));
    }
    Ok(())
}

fn int_field(s: &Structure, index: usize, name: &str) -> Result<i64, PackStreamError> {
    s.field(index)
        .as_int()
        .ok_or_else(|| PackStreamError::InvalidStructure(format!("{} field {} must be an integer", name, index)))
}

fn float_field(s: &Structure, index: usize, name: &str) -> Result<f64, PackStreamError> {
    s.field(index)
        .as_float()
        .ok_or_else(|| PackStreamError::InvalidStructure(format!("{} field {} must be a float", name, index)))
}

fn string_field(s: &Structure, index: usize, name: &str) -> Result<String, PackStreamError> {
    s.field(index)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PackStreamError::InvalidStructure(format!("{} field {} must be a string", name, index)))
}

fn map_field(s: &Structure, index: usize, name: &str) -> Result<HashMap<String, Value>, PackStreamError> {
    s.field(index)
        .as_map()
        .cloned()
        .ok_or_else(|| PackStreamError::InvalidStructure(format!("{} field {} must be a map", name, index)))
}

/// A graph node. `element_id` is present from Bolt 5.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Value>,
    pub element_id: Option<String>,
}

impl Node {
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Node".into()))?;
        expect_tag(s, tag::NODE, "Node", 3)?;
        let labels = s
            .field(1)
            .as_list()
            .ok_or_else(|| PackStreamError::InvalidStructure("Node labels must be a list".into()))?
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(Self {
            id: int_field(s, 0, "Node")?,
            labels,
            properties: map_field(s, 2, "Node")?,
            element_id: s.field(3).as_str().map(str::to_string),
        })
    }
}

/// A graph relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub rel_type: String,
    pub properties: HashMap<String, Value>,
    pub element_id: Option<String>,
}

impl Relationship {
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Relationship".into()))?;
        expect_tag(s, tag::RELATIONSHIP, "Relationship", 5)?;
        Ok(Self {
            id: int_field(s, 0, "Relationship")?,
            start_id: int_field(s, 1, "Relationship")?,
            end_id: int_field(s, 2, "Relationship")?,
            rel_type: string_field(s, 3, "Relationship")?,
            properties: map_field(s, 4, "Relationship")?,
            element_id: s.field(5).as_str().map(str::to_string),
        })
    }
}

/// A path: distinct nodes, unbound relationships, and the index sequence
/// that walks them.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Structure>,
    pub indices: Vec<i64>,
}

impl Path {
    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Path".into()))?;
        expect_tag(s, tag::PATH, "Path", 3)?;
        let nodes = s
            .field(0)
            .as_list()
            .unwrap_or_default()
            .iter()
            .map(Node::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let relationships = s
            .field(1)
            .as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.as_structure().cloned())
            .filter(|r| r.tag == tag::UNBOUND_RELATIONSHIP)
            .collect();
        let indices = s
            .field(2)
            .as_list()
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_int)
            .collect();
        Ok(Self {
            nodes,
            relationships,
            indices,
        })
    }
}

/// Days since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub days: i64,
}

impl Date {
    pub fn to_value(self) -> Value {
        Value::Structure(Structure::new(tag::DATE, vec![Value::Integer(self.days)]))
    }

    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Date".into()))?;
        expect_tag(s, tag::DATE, "Date", 1)?;
        Ok(Self {
            days: int_field(s, 0, "Date")?,
        })
    }

    pub fn to_naive(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(self.days))
    }
}

impl From<NaiveDate> for Date {
    fn from(date: NaiveDate) -> Self {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
        Self {
            days: (date - epoch).num_days(),
        }
    }
}

/// Wall-clock date-time with no zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl LocalDateTime {
    pub fn to_value(self) -> Value {
        Value::Structure(Structure::new(
            tag::LOCAL_DATE_TIME,
            vec![Value::Integer(self.seconds), Value::Integer(self.nanoseconds)],
        ))
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds as u32).map(|dt| dt.naive_utc())
    }
}

impl From<NaiveDateTime> for LocalDateTime {
    fn from(dt: NaiveDateTime) -> Self {
        let utc = dt.and_utc();
        Self {
            seconds: utc.timestamp(),
            nanoseconds: utc.timestamp_subsec_nanos() as i64,
        }
    }
}

/// Zone attached to a date-time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Zone {
    Offset(i32),
    Named(String),
}

/// A date-time with an offset or a named zone.
///
/// `utc_seconds` records which dialect `seconds` is expressed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonedDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub zone: Zone,
    pub utc_seconds: bool,
}

impl ZonedDateTime {
    pub fn is_date_time_tag(t: u8) -> bool {
        matches!(
            t,
            tag::DATE_TIME | tag::DATE_TIME_ZONE_ID | tag::LEGACY_DATE_TIME | tag::LEGACY_DATE_TIME_ZONE_ID
        )
    }

    pub fn from_structure(s: &Structure) -> Result<Self, PackStreamError> {
        if !Self::is_date_time_tag(s.tag) || s.fields.len() < 3 {
            return Err(PackStreamError::InvalidStructure(format!(
                "not a date-time structure: tag 0x{:02X}",
                s.tag
            )));
        }
        let zone = match s.tag {
            tag::DATE_TIME | tag::LEGACY_DATE_TIME => Zone::Offset(int_field(s, 2, "DateTime")? as i32),
            _ => Zone::Named(string_field(s, 2, "DateTime")?),
        };
        Ok(Self {
            seconds: int_field(s, 0, "DateTime")?,
            nanoseconds: int_field(s, 1, "DateTime")?,
            zone,
            utc_seconds: matches!(s.tag, tag::DATE_TIME | tag::DATE_TIME_ZONE_ID),
        })
    }

    /// Encode in the given dialect. Offsets convert between dialects; a
    /// named zone cannot be moved between dialects without zone rules.
    pub fn to_structure(&self, encoding: DateTimeEncoding) -> Result<Structure, PackStreamError> {
        let want_utc = encoding == DateTimeEncoding::Utc;
        let seconds = match (&self.zone, self.utc_seconds, want_utc) {
            (_, have, want) if have == want => self.seconds,
            (Zone::Offset(offset), true, false) => self.seconds + *offset as i64,
            (Zone::Offset(offset), false, true) => self.seconds - *offset as i64,
            (Zone::Named(zone), _, _) => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "date-time in zone {} cannot be converted between wire dialects",
                    zone
                )))
            }
            _ => self.seconds,
        };
        let (t, zone) = match (&self.zone, want_utc) {
            (Zone::Offset(o), true) => (tag::DATE_TIME, Value::Integer(*o as i64)),
            (Zone::Offset(o), false) => (tag::LEGACY_DATE_TIME, Value::Integer(*o as i64)),
            (Zone::Named(z), true) => (tag::DATE_TIME_ZONE_ID, Value::String(z.clone())),
            (Zone::Named(z), false) => (tag::LEGACY_DATE_TIME_ZONE_ID, Value::String(z.clone())),
        };
        Ok(Structure::new(
            t,
            vec![Value::Integer(seconds), Value::Integer(self.nanoseconds), zone],
        ))
    }

    /// Value in the UTC dialect, which every connection can adapt from.
    pub fn to_value(&self) -> Result<Value, PackStreamError> {
        self.to_structure(DateTimeEncoding::Utc).map(Value::Structure)
    }

    pub fn to_chrono(&self) -> Option<DateTime<FixedOffset>> {
        let Zone::Offset(offset) = &self.zone else {
            return None;
        };
        let offset = *offset;
        let tz = FixedOffset::east_opt(offset)?;
        let utc = if self.utc_seconds {
            self.seconds
        } else {
            self.seconds - offset as i64
        };
        DateTime::from_timestamp(utc, self.nanoseconds as u32).map(|dt| dt.with_timezone(&tz))
    }
}

impl From<DateTime<FixedOffset>> for ZonedDateTime {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanoseconds: dt.timestamp_subsec_nanos() as i64,
            zone: Zone::Offset(dt.offset().local_minus_utc()),
            utc_seconds: true,
        }
    }
}

/// Months, days, seconds and nanoseconds, kept separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl Duration {
    pub fn to_value(self) -> Value {
        Value::Structure(Structure::new(
            tag::DURATION,
            vec![
                Value::Integer(self.months),
                Value::Integer(self.days),
                Value::Integer(self.seconds),
                Value::Integer(self.nanoseconds),
            ],
        ))
    }

    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Duration".into()))?;
        expect_tag(s, tag::DURATION, "Duration", 4)?;
        Ok(Self {
            months: int_field(s, 0, "Duration")?,
            days: int_field(s, 1, "Duration")?,
            seconds: int_field(s, 2, "Duration")?,
            nanoseconds: int_field(s, 3, "Duration")?,
        })
    }
}

/// A 2D or 3D point in a spatial reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn to_value(self) -> Value {
        let mut fields = vec![Value::Integer(self.srid), Value::Float(self.x), Value::Float(self.y)];
        let t = match self.z {
            Some(z) => {
                fields.push(Value::Float(z));
                tag::POINT_3D
            }
            None => tag::POINT_2D,
        };
        Value::Structure(Structure::new(t, fields))
    }

    pub fn from_value(value: &Value) -> Result<Self, PackStreamError> {
        let s = value
            .as_structure()
            .ok_or_else(|| PackStreamError::InvalidStructure("expected a Point".into()))?;
        let z = match s.tag {
            tag::POINT_2D => {
                expect_tag(s, tag::POINT_2D, "Point2D", 3)?;
                None
            }
            _ => {
                expect_tag(s, tag::POINT_3D, "Point3D", 4)?;
                Some(float_field(s, 3, "Point3D")?)
            }
        };
        Ok(Self {
            srid: int_field(s, 0, "Point")?,
            x: float_field(s, 1, "Point")?,
            y: float_field(s, 2, "Point")?,
            z,
        })
    }
}
