//! Live samples and archive records.
//!
//! The host engine hands every service a flat map of observation fields. A
//! [`Sample`] wraps that map: string field names to loosely typed values,
//! always carrying the observation timestamp under [`DATE_TIME`] and usually
//! the unit-system code under [`UNIT_SYSTEM`]. The same shape is used for
//! high-rate live samples and for the once-per-window archive record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{WxError, WxResult};
use crate::units::UnitSystem;

/// Field name of the observation timestamp, in epoch seconds.
pub const DATE_TIME: &str = "dateTime";

/// Field name of the record's unit-system code.
pub const UNIT_SYSTEM: &str = "usUnits";

/// Field name of the archive interval, in minutes.
pub const INTERVAL: &str = "interval";

/// A single observation field value.
///
/// `Null` is distinct from an absent field: a present-but-null field means
/// the station reported the observation slot with no reading in it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Present but empty.
    Null,
    /// Numeric reading.
    Number(f64),
    /// Textual reading, rare but allowed by the host.
    Text(String),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the numeric reading, or `None` for null and text values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the textual reading, or `None` for other variants.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Option<f64>> for Value {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Value::Null, Value::Number)
    }
}

impl From<Option<i64>> for Value {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Value::Null, |n| Value::Number(n as f64))
    }
}

/// A flat observation map, either a live sample or an archive record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sample {
    fields: BTreeMap<String, Value>,
}

impl Sample {
    /// Creates an empty sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sample stamped with the given observation timestamp.
    pub fn at(time: i64) -> Self {
        let mut sample = Self::new();
        sample.set(DATE_TIME, time);
        sample
    }

    /// The observation timestamp in epoch seconds.
    ///
    /// Every sample delivered by the host carries one; a sample without it
    /// violates the host contract and yields [`WxError::MissingField`].
    pub fn timestamp(&self) -> WxResult<i64> {
        self.number(DATE_TIME)
            .map(|t| t as i64)
            .ok_or(WxError::MissingField(DATE_TIME))
    }

    /// The record's unit system, if the `usUnits` code is present and known.
    pub fn unit_system(&self) -> Option<UnitSystem> {
        self.number(UNIT_SYSTEM)
            .and_then(|code| UnitSystem::from_code(code as i64))
    }

    /// Returns the raw value of a field, or `None` if the field is absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the numeric reading of a field.
    ///
    /// Absent fields, null fields and text fields all yield `None`, which is
    /// exactly the set of cases the accumulator skips over.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Sets a field, overwriting any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Removes a field, returning its previous value if any.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Returns `true` if the field is present, even with a null value.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Number of fields in the sample.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` for a sample with no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates the fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in name order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Whether a name is usable both as an observation field and as an archive
/// column: a leading letter or underscore followed by letters, digits or
/// underscores.
///
/// Derived field names come from the configuration and end up interpolated
/// into SQL, so anything else is rejected at construction time.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
