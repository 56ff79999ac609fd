//! Backend-agnostic scalar values and row mappings
//!
//! Every adapter converts its driver's native values into [`Scalar`]. The JSON form is
//! decided in exactly one place, the `Serialize` impl below:
//!
//! | Scalar | JSON |
//! |---|---|
//! | `Date`, `Time`, `DateTime`, `DateTimeTz` | ISO-8601 string |
//! | `Decimal` | number (via `f64`, lossy) |
//! | `Bytes` | lowercase hex string |
//! | `Float` (non-finite) | `null` |
//! | `Other` | its string form |
//! | everything else | native JSON |

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// One cell of a result set
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    /// Nested structures (JSON columns, arrays, structs)
    Json(serde_json::Value),
    /// Values with no JSON counterpart (UUIDs, intervals, geometry), kept in display form
    Other(String),
}

impl Scalar {
    /// Integer view used for `COUNT(*)` results, whatever type the backend chose
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            Self::Decimal(d) => d.trunc().to_i64(),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Self::Text(s) | Self::Other(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render the value as a `serde_json::Value` (same rules as `Serialize`)
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<Option<Scalar>> for Scalar {
    fn from(value: Option<Scalar>) -> Self {
        value.unwrap_or(Self::Null)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::UInt(v) => serializer.serialize_u64(*v),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(_) => serializer.serialize_unit(),
            Self::Decimal(d) => match d.to_f64() {
                Some(f) => serializer.serialize_f64(f),
                None => serializer.serialize_str(&d.to_string()),
            },
            Self::Text(s) | Self::Other(s) => serializer.serialize_str(s),
            Self::Bytes(bytes) => serializer.serialize_str(&to_hex(bytes)),
            Self::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            Self::Time(t) => serializer.serialize_str(&t.format("%H:%M:%S%.f").to_string()),
            Self::DateTime(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Self::DateTimeTz(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
            }
            Self::Json(v) => v.serialize(serializer),
        }
    }
}

/// Lowercase hex rendering of binary payloads
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Parse a hex string (either case); `None` on odd length or a non-hex digit
#[must_use]
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| text.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// One result row: column name to value, in result-set column order
///
/// When two columns share a name the later value replaces the earlier one in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Scalar)>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zip a column description with one row of values
    #[must_use]
    pub fn from_row(columns: &[String], values: Vec<Scalar>) -> Self {
        let mut record = Self { fields: Vec::with_capacity(columns.len()) };
        for (name, value) in columns.iter().zip(values) {
            record.insert(name.clone(), value);
        }
        record
    }

    pub fn insert(&mut self, name: String, value: Scalar) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
