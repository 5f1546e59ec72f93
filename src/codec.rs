//! Typed property codec
//!
//! Properties arrive from the bus as variants. Every property we read has a
//! declared [Tag]; decoding checks the variant against that tag and renders
//! the value as text. A value carrying any other type is a
//! [Error::Decode], never an empty string.
//!
//! Writes go the other way: client text is parsed according to the tag
//! listed for the property in [WRITABLE_UNIT_PROPERTIES] and turned back
//! into a bus value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use zbus::zvariant::{OwnedValue, Value};

use crate::error::{Error, Result};

/// Expected type of a property on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    String,
    Bool,
    UInt32,
    UInt64,
    /// Microseconds since the epoch, carried as a `t`
    TimestampMicros,
}

impl Tag {
    /// D-Bus signature of the wire value
    pub fn signature(&self) -> &'static str {
        match self {
            Self::String => "s",
            Self::Bool => "b",
            Self::UInt32 => "u",
            Self::UInt64 | Self::TimestampMicros => "t",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "boolean",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::TimestampMicros => "timestamp",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties that may be written on units, with the type systemd expects.
///
/// Anything not listed here is rejected before a connection is opened.
pub const WRITABLE_UNIT_PROPERTIES: &[(&str, Tag)] = &[
    ("CPUShares", Tag::UInt64),
    ("CPUWeight", Tag::UInt64),
    ("StartupCPUWeight", Tag::UInt64),
    ("IOWeight", Tag::UInt64),
    ("MemoryMax", Tag::UInt64),
    ("MemoryHigh", Tag::UInt64),
    ("TasksMax", Tag::UInt64),
    ("CPUAccounting", Tag::Bool),
    ("MemoryAccounting", Tag::Bool),
    ("TasksAccounting", Tag::Bool),
];

/// Look up the write tag of a unit property
pub fn writable_tag(property: &str) -> Option<Tag> {
    WRITABLE_UNIT_PROPERTIES
        .iter()
        .find(|(name, _)| *name == property)
        .map(|(_, tag)| *tag)
}

/// A bus value that matched its expected tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    String(String),
    Bool(bool),
    UInt32(u32),
    UInt64(u64),
    /// Microseconds since the epoch, always within chrono's range
    TimestampMicros(u64),
}

impl PropertyValue {
    pub fn tag(&self) -> Tag {
        match self {
            Self::String(_) => Tag::String,
            Self::Bool(_) => Tag::Bool,
            Self::UInt32(_) => Tag::UInt32,
            Self::UInt64(_) => Tag::UInt64,
            Self::TimestampMicros(_) => Tag::TimestampMicros,
        }
    }

    /// Read `raw` as a value of type `expected`.
    pub fn from_bus(property: &str, raw: &Value<'_>, expected: Tag) -> Result<Self> {
        let raw = unwrap_variant(raw);
        let mismatch = || Error::Decode {
            property: property.to_string(),
            expected,
            actual: raw.value_signature().to_string(),
        };

        match (expected, raw) {
            (Tag::String, Value::Str(s)) => Ok(Self::String(s.as_str().to_string())),
            (Tag::Bool, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (Tag::UInt32, Value::U32(n)) => Ok(Self::UInt32(*n)),
            (Tag::UInt64, Value::U64(n)) => Ok(Self::UInt64(*n)),
            (Tag::TimestampMicros, Value::U64(usec)) => match timestamp_from_micros(*usec) {
                Some(_) => Ok(Self::TimestampMicros(*usec)),
                None => Err(Error::Decode {
                    property: property.to_string(),
                    expected,
                    actual: format!("out of range timestamp {}", usec),
                }),
            },
            _ => Err(mismatch()),
        }
    }

    /// Parse client text as a value of type `tag`.
    pub fn parse(property: &str, tag: Tag, text: &str) -> Result<Self> {
        let text = text.trim();
        let parsed = match tag {
            Tag::String => Some(Self::String(text.to_string())),
            Tag::Bool => parse_bool(text).map(Self::Bool),
            Tag::UInt32 => text.parse().ok().map(Self::UInt32),
            Tag::UInt64 => text.parse().ok().map(Self::UInt64),
            Tag::TimestampMicros => text
                .parse()
                .ok()
                .filter(|usec| timestamp_from_micros(*usec).is_some())
                .map(Self::TimestampMicros),
        };

        parsed.ok_or_else(|| Error::Encode {
            property: property.to_string(),
            tag,
            value: text.to_string(),
        })
    }

    /// Bus representation, typed per [Tag::signature]
    pub fn to_bus(&self) -> Value<'static> {
        match self {
            Self::String(s) => Value::from(s.clone()),
            Self::Bool(b) => Value::from(*b),
            Self::UInt32(n) => Value::from(*n),
            Self::UInt64(n) => Value::from(*n),
            Self::TimestampMicros(usec) => Value::from(*usec),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::UInt32(n) => write!(f, "{}", n),
            Self::UInt64(n) => write!(f, "{}", n),
            Self::TimestampMicros(usec) => match timestamp_from_micros(*usec) {
                Some(t) => write!(f, "{}", t.format("%a %Y-%m-%d %H:%M:%S%.6f UTC")),
                None => write!(f, "{}", usec),
            },
        }
    }
}

/// Decode a bus value into its text form, checking it against `expected`.
pub fn decode(property: &str, raw: &Value<'_>, expected: Tag) -> Result<String> {
    PropertyValue::from_bus(property, raw, expected).map(|v| v.to_string())
}

/// Encode client text for a whitelisted unit property.
pub fn encode(property: &str, text: &str) -> Result<PropertyValue> {
    let tag = writable_tag(property).ok_or_else(|| Error::UnknownProperty(property.to_string()))?;
    PropertyValue::parse(property, tag, text)
}

/// Parse boolean text the way systemd does (yes/no, on/off, 1/0, ...)
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "yes" | "y" | "true" | "t" | "on" => Some(true),
        "0" | "no" | "n" | "false" | "f" | "off" => Some(false),
        _ => None,
    }
}

fn timestamp_from_micros(usec: u64) -> Option<DateTime<Utc>> {
    i64::try_from(usec)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
}

fn unwrap_variant<'a>(value: &'a Value<'a>) -> &'a Value<'a> {
    match value {
        Value::Value(inner) => unwrap_variant(inner),
        other => other,
    }
}

/// Properties keyed by name, rendered as JSON
pub type PropertyMap = BTreeMap<String, Json>;

/// Render a whole property table (as returned by `GetAll`)
pub fn properties_to_json(properties: HashMap<String, OwnedValue>) -> PropertyMap {
    properties
        .into_iter()
        .map(|(name, value)| (name, value_to_json(&value)))
        .collect()
}

/// Render any bus value as JSON
///
/// Containers are rendered recursively: arrays and structs become JSON
/// arrays, dicts become objects keyed by the key's text form.
pub fn value_to_json(value: &Value<'_>) -> Json {
    match value {
        Value::U8(n) => Json::from(*n),
        Value::Bool(b) => Json::from(*b),
        Value::I16(n) => Json::from(*n),
        Value::U16(n) => Json::from(*n),
        Value::I32(n) => Json::from(*n),
        Value::U32(n) => Json::from(*n),
        Value::I64(n) => Json::from(*n),
        Value::U64(n) => Json::from(*n),
        Value::F64(n) => serde_json::Number::from_f64(*n)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Str(s) => Json::from(s.as_str()),
        Value::Signature(s) => Json::from(s.to_string()),
        Value::ObjectPath(p) => Json::from(p.as_str()),
        Value::Value(inner) => value_to_json(inner),
        Value::Array(array) => Json::Array(array.iter().map(value_to_json).collect()),
        Value::Dict(dict) => Json::Object(
            dict.iter()
                .map(|(k, v)| (value_text(k), value_to_json(v)))
                .collect(),
        ),
        Value::Structure(fields) => {
            Json::Array(fields.fields().iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Json::Null,
    }
}

/// Plain text of a bus value: strings and paths as-is, anything else as JSON
pub fn value_text(value: &Value<'_>) -> String {
    match unwrap_variant(value) {
        Value::Str(s) => s.as_str().to_string(),
        Value::ObjectPath(p) => p.as_str().to_string(),
        other => value_to_json(other).to_string(),
    }
}
