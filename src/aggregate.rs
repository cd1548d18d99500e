//! Retrospective window-aggregate queries against the archive.
//!
//! Reports ask questions like "when was the closest strike this month?". The
//! archive already stores, per window, each extremum's value and the time it
//! was observed, so the answer is a single ordered query: pick the row with
//! the best value column and return its derived time column. The
//! [`AggregateQuery`] adapter knows which derived time fields exist, which
//! value field each one is paired with, and which aggregation kind the pair
//! was produced under.
//!
//! Rows where the paired value column is null are skipped, and ties between
//! windows resolve to the later window, mirroring the live tie rule within a
//! window.

use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use log::debug;

use crate::archive::{is_missing_column, Archive, TABLE};
use crate::error::{WxError, WxResult};
use crate::extrema::{ExtremaKind, TrackedObservation};
use crate::sample::DATE_TIME;
use crate::units::{UnitRegistry, UnitSystem, GROUP_TIME, UNIT_UNIX_EPOCH};

/// A half-open query window `(start, stop]` in epoch seconds, matching the
/// host convention that a record timestamped at a window's stop belongs to
/// that window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSpan {
    /// Exclusive start of the span.
    pub start: i64,
    /// Inclusive stop of the span.
    pub stop: i64,
}

impl TimeSpan {
    /// Builds a span from `(start, stop]` epoch seconds.
    pub fn new(start: i64, stop: i64) -> Self {
        Self { start, stop }
    }

    /// Whether a timestamp falls inside the span.
    pub fn contains(&self, time: i64) -> bool {
        time > self.start && time <= self.stop
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (
            DateTime::from_timestamp(self.start, 0),
            DateTime::from_timestamp(self.stop, 0),
        ) {
            (Some(start), Some(stop)) => write!(
                f,
                "({} .. {}]",
                start.format("%Y-%m-%d %H:%M:%S"),
                stop.format("%Y-%m-%d %H:%M:%S")
            ),
            _ => write!(f, "({} .. {}]", self.start, self.stop),
        }
    }
}

/// An aggregate result: the value, if any, and its unit tag.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueTuple {
    /// The aggregate value, `None` when the span holds no qualifying rows.
    pub value: Option<f64>,
    /// Unit label of the value.
    pub unit: String,
    /// Unit group of the value.
    pub group: String,
}

#[derive(Clone, Debug)]
struct Registration {
    kind: ExtremaKind,
    value_field: String,
    unit: String,
    group: String,
}

/// Query adapter over the derived time fields of a set of tracked
/// observations.
#[derive(Clone, Debug, Default)]
pub struct AggregateQuery {
    fields: HashMap<String, Registration>,
}

impl AggregateQuery {
    /// Registers the derived time fields of the given observations, tagged
    /// from the standard unit registry.
    pub fn from_observations<'a, I>(observations: I) -> Self
    where
        I: IntoIterator<Item = &'a TrackedObservation>,
    {
        Self::with_registry(observations, &UnitRegistry::standard())
    }

    /// Like [`AggregateQuery::from_observations`], but tagging from a custom
    /// unit registry.
    pub fn with_registry<'a, I>(observations: I, registry: &UnitRegistry) -> Self
    where
        I: IntoIterator<Item = &'a TrackedObservation>,
    {
        let unit = registry
            .unit_of(GROUP_TIME, UnitSystem::Us)
            .unwrap_or(UNIT_UNIX_EPOCH)
            .to_string();
        let mut fields = HashMap::new();
        for observation in observations {
            for (kind, names) in observation.outputs() {
                fields.insert(
                    names.time_field.clone(),
                    Registration {
                        kind: *kind,
                        value_field: names.value_field.clone(),
                        unit: unit.clone(),
                        group: GROUP_TIME.to_string(),
                    },
                );
            }
        }
        Self { fields }
    }

    /// Names of all queryable derived time fields.
    pub fn registered_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Answers one aggregate query over the span.
    ///
    /// Returns a null-valued [`ValueTuple`] when the span holds no qualifying
    /// rows, [`WxError::UnknownField`] for an unregistered field or one the
    /// deployed schema never grew a column for, and
    /// [`WxError::UnsupportedAggregation`] when the kind does not match the
    /// field's registration.
    pub fn get_aggregate(
        &self,
        field: &str,
        span: TimeSpan,
        kind: ExtremaKind,
        archive: &Archive,
    ) -> WxResult<ValueTuple> {
        let registration = self
            .fields
            .get(field)
            .ok_or_else(|| WxError::UnknownField(field.to_string()))?;
        if registration.kind != kind {
            return Err(WxError::UnsupportedAggregation {
                field: field.to_string(),
                kind,
            });
        }

        let value_field = registration.value_field.as_str();
        let order = match kind {
            ExtremaKind::First => format!("{DATE_TIME} ASC"),
            ExtremaKind::Last => format!("{DATE_TIME} DESC"),
            ExtremaKind::Min => format!("\"{value_field}\" ASC, {DATE_TIME} DESC"),
            ExtremaKind::Max => format!("\"{value_field}\" DESC, {DATE_TIME} DESC"),
        };
        let sql = format!(
            "SELECT \"{field}\" FROM {TABLE} \
             WHERE {DATE_TIME} > ? AND {DATE_TIME} <= ? AND \"{value_field}\" IS NOT NULL \
             ORDER BY {order} LIMIT 1"
        );
        debug!("aggregate {kind} of {field} over {span}");

        let value = match archive.select_one_f64(&sql, &[&span.start, &span.stop]) {
            Ok(value) => value,
            Err(WxError::Storage(err)) if is_missing_column(&err) => {
                return Err(WxError::UnknownField(field.to_string()));
            }
            Err(err) => return Err(err),
        };
        Ok(ValueTuple {
            value,
            unit: registration.unit.clone(),
            group: registration.group.clone(),
        })
    }
}
