//! Running first/last/min/max extrema over one archive window.
//!
//! The [`ExtremaAccumulator`] is the live half of the crate. For every tracked
//! source observation it keeps an [`ExtremaState`] of up to four extremum
//! slots, updated on each sample and reset at the start of each archive
//! window. After every update the current value and the time it was observed
//! are stamped back onto the sample under configured derived field names, so
//! downstream consumers of the live stream always see the running extrema.
//!
//! Update rules per kind:
//!
//! - `first`: set only while unset, then frozen for the rest of the window.
//! - `last`: overwritten by every observed value.
//! - `min`: replaced when the new value is less than *or equal to* the
//!   current one, so the latest of several equal minima wins.
//! - `max`: replaced when the new value is greater than or equal to the
//!   current one, with the same late-tie rule.
//!
//! Samples where the source field is absent, null or non-numeric never touch
//! the state, but the derived output fields are stamped regardless, null when
//! nothing has been observed yet in the window.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{WxError, WxResult};
use crate::sample::{is_identifier, Sample, Value};

/// The four aggregation kinds an observation can be tracked under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremaKind {
    /// Earliest observed value of the window.
    First,
    /// Latest observed value of the window.
    Last,
    /// Smallest observed value of the window.
    Min,
    /// Largest observed value of the window.
    Max,
}

impl ExtremaKind {
    /// All kinds, in the order they are conventionally configured.
    pub const ALL: [ExtremaKind; 4] = [
        ExtremaKind::First,
        ExtremaKind::Last,
        ExtremaKind::Min,
        ExtremaKind::Max,
    ];

    /// The lowercase configuration name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtremaKind::First => "first",
            ExtremaKind::Last => "last",
            ExtremaKind::Min => "min",
            ExtremaKind::Max => "max",
        }
    }
}

impl fmt::Display for ExtremaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExtremaKind {
    type Err = WxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(ExtremaKind::First),
            "last" => Ok(ExtremaKind::Last),
            "min" => Ok(ExtremaKind::Min),
            "max" => Ok(ExtremaKind::Max),
            other => Err(WxError::Config(format!(
                "unknown aggregation kind '{other}'"
            ))),
        }
    }
}

/// One observed extremum: the value and the epoch second it was seen.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    /// The observed value.
    pub value: f64,
    /// Observation timestamp of the sample that set it.
    pub time: i64,
}

/// Per-window extremum slots of one tracked observation.
///
/// Every slot starts the window as `None` and is filled by the first
/// qualifying sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExtremaState {
    first: Option<Extremum>,
    last: Option<Extremum>,
    min: Option<Extremum>,
    max: Option<Extremum>,
}

impl ExtremaState {
    /// The current extremum of the given kind, if one has been observed.
    pub fn get(&self, kind: ExtremaKind) -> Option<Extremum> {
        match kind {
            ExtremaKind::First => self.first,
            ExtremaKind::Last => self.last,
            ExtremaKind::Min => self.min,
            ExtremaKind::Max => self.max,
        }
    }

    fn slot_mut(&mut self, kind: ExtremaKind) -> &mut Option<Extremum> {
        match kind {
            ExtremaKind::First => &mut self.first,
            ExtremaKind::Last => &mut self.last,
            ExtremaKind::Min => &mut self.min,
            ExtremaKind::Max => &mut self.max,
        }
    }

    /// Applies one observed value, returning `true` if the slot changed.
    pub fn update(&mut self, kind: ExtremaKind, value: f64, time: i64) -> bool {
        let slot = self.slot_mut(kind);
        let take = match (kind, slot.as_ref()) {
            (ExtremaKind::Last, _) => true,
            (_, None) => true,
            (ExtremaKind::First, Some(_)) => false,
            (ExtremaKind::Min, Some(current)) => value <= current.value,
            (ExtremaKind::Max, Some(current)) => value >= current.value,
        };
        if take {
            *slot = Some(Extremum { value, time });
        }
        take
    }

    /// Clears every slot back to unset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Derived output field names of one `(source, kind)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivedNames {
    /// Field that receives the extremum value.
    #[serde(rename = "observation_name")]
    pub value_field: String,
    /// Field that receives the extremum's observation time.
    #[serde(rename = "observation_time_name")]
    pub time_field: String,
}

impl DerivedNames {
    /// Builds a pair of derived names.
    pub fn new(value_field: impl Into<String>, time_field: impl Into<String>) -> Self {
        Self {
            value_field: value_field.into(),
            time_field: time_field.into(),
        }
    }
}

/// A source observation together with the kinds tracked for it.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObservation {
    source: String,
    outputs: Vec<(ExtremaKind, DerivedNames)>,
}

impl TrackedObservation {
    /// Starts tracking a source observation with no kinds attached yet.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            outputs: Vec::new(),
        }
    }

    /// Adds one tracked kind with its derived output names.
    pub fn track(
        mut self,
        kind: ExtremaKind,
        value_field: impl Into<String>,
        time_field: impl Into<String>,
    ) -> Self {
        self.outputs
            .push((kind, DerivedNames::new(value_field, time_field)));
        self
    }

    /// The canned lightning-distance tracking used when a station reports
    /// strike distances and no mapping has been configured.
    pub fn lightning_distance() -> Self {
        Self::new("lightning_distance")
            .track(
                ExtremaKind::First,
                "lightning_first_distance",
                "lightning_first_det_time",
            )
            .track(
                ExtremaKind::Last,
                "lightning_last_distance",
                "lightning_last_det_time",
            )
            .track(
                ExtremaKind::Min,
                "lightning_min_distance",
                "lightning_min_det_time",
            )
            .track(
                ExtremaKind::Max,
                "lightning_max_distance",
                "lightning_max_det_time",
            )
    }

    /// The source observation field.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The tracked kinds and their derived names, in configuration order.
    pub fn outputs(&self) -> &[(ExtremaKind, DerivedNames)] {
        &self.outputs
    }

    /// Checks the observation in isolation: at least one kind, no kind twice,
    /// and every field name usable as an archive column.
    pub fn validate(&self) -> WxResult<()> {
        if !is_identifier(&self.source) {
            return Err(WxError::Config(format!(
                "invalid source observation name '{}'",
                self.source
            )));
        }
        if self.outputs.is_empty() {
            return Err(WxError::Config(format!(
                "observation '{}' tracks no aggregation kinds",
                self.source
            )));
        }
        let mut kinds = HashSet::new();
        for (kind, names) in &self.outputs {
            if !kinds.insert(*kind) {
                return Err(WxError::Config(format!(
                    "observation '{}' maps kind '{kind}' more than once",
                    self.source
                )));
            }
            for field in [&names.value_field, &names.time_field] {
                if !is_identifier(field) {
                    return Err(WxError::Config(format!(
                        "invalid derived field name '{field}' for observation '{}'",
                        self.source
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A finalized window's derived fields, every output name mapped to its
/// value or to null when nothing was observed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowSnapshot {
    fields: BTreeMap<String, Value>,
}

impl WindowSnapshot {
    /// Value of one derived field in the snapshot.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Iterates the derived fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of derived fields in the snapshot.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` when no observations are tracked at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Writes every derived field into an archive record, overwriting any
    /// values stamped there during the live window.
    pub fn merge_into(&self, record: &mut Sample) {
        for (field, value) in &self.fields {
            record.set(field.clone(), value.clone());
        }
    }
}

struct Slot {
    observation: TrackedObservation,
    state: ExtremaState,
}

impl Slot {
    fn stamp(&self, sample: &mut Sample) {
        for (kind, names) in self.observation.outputs() {
            let current = self.state.get(*kind);
            sample.set(names.value_field.clone(), current.map(|e| e.value));
            sample.set(names.time_field.clone(), current.map(|e| e.time));
        }
    }
}

/// Tracks extrema for a set of observations across one archive window at a
/// time.
pub struct ExtremaAccumulator {
    slots: Vec<Slot>,
}

impl ExtremaAccumulator {
    /// Builds an accumulator over the given tracked observations.
    ///
    /// Fails when any observation is invalid on its own, when two sources are
    /// tracked twice, or when a derived output name collides with another
    /// output or with a tracked source.
    pub fn new(observations: Vec<TrackedObservation>) -> WxResult<Self> {
        let mut sources = HashSet::new();
        for observation in &observations {
            observation.validate()?;
            if !sources.insert(observation.source().to_string()) {
                return Err(WxError::Config(format!(
                    "observation '{}' is tracked more than once",
                    observation.source()
                )));
            }
        }
        let mut outputs = HashSet::new();
        for observation in &observations {
            for (_, names) in observation.outputs() {
                for field in [&names.value_field, &names.time_field] {
                    if sources.contains(field.as_str()) {
                        return Err(WxError::Config(format!(
                            "derived field '{field}' collides with a tracked source"
                        )));
                    }
                    if !outputs.insert(field.clone()) {
                        return Err(WxError::Config(format!(
                            "derived field '{field}' is produced more than once"
                        )));
                    }
                }
            }
        }

        Ok(Self {
            slots: observations
                .into_iter()
                .map(|observation| Slot {
                    observation,
                    state: ExtremaState::default(),
                })
                .collect(),
        })
    }

    /// The tracked observations, in configuration order.
    pub fn observations(&self) -> impl Iterator<Item = &TrackedObservation> {
        self.slots.iter().map(|slot| &slot.observation)
    }

    /// Every derived output field name, value fields and time fields alike.
    pub fn derived_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        for slot in &self.slots {
            for (_, names) in slot.observation.outputs() {
                fields.push(names.value_field.as_str());
                fields.push(names.time_field.as_str());
            }
        }
        fields
    }

    /// Current state of one tracked source, mainly for inspection in tests.
    pub fn state(&self, source: &str) -> Option<&ExtremaState> {
        self.slots
            .iter()
            .find(|slot| slot.observation.source() == source)
            .map(|slot| &slot.state)
    }

    /// Clears all extrema at the start of a new archive window.
    pub fn reset_window(&mut self) {
        for slot in &mut self.slots {
            slot.state.reset();
        }
    }

    /// Folds one live sample into the window state and stamps the running
    /// extrema back onto it.
    ///
    /// Absent, null and non-numeric source readings leave the state alone,
    /// but the derived output fields are always written, null while unset.
    /// The only error is a sample without its `dateTime` timestamp.
    pub fn observe(&mut self, sample: &mut Sample) -> WxResult<()> {
        let time = sample.timestamp()?;
        for slot in &mut self.slots {
            if let Some(value) = sample.number(slot.observation.source()) {
                for (kind, _) in slot.observation.outputs() {
                    if slot.state.update(*kind, value, time) {
                        trace!(
                            "{} {} is now {value} at {time}",
                            slot.observation.source(),
                            kind
                        );
                    }
                }
            }
            slot.stamp(sample);
        }
        Ok(())
    }

    /// Snapshot of every derived field at the end of the window.
    ///
    /// Finalizing does not reset the state; the reset belongs to the start of
    /// the next window.
    pub fn finalize_window(&self) -> WindowSnapshot {
        let mut fields = BTreeMap::new();
        for slot in &self.slots {
            for (kind, names) in slot.observation.outputs() {
                let current = slot.state.get(*kind);
                fields.insert(names.value_field.clone(), current.map(|e| e.value).into());
                fields.insert(names.time_field.clone(), current.map(|e| e.time).into());
            }
        }
        WindowSnapshot { fields }
    }
}
