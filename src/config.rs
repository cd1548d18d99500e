//! Configuration management.
//!
//! The host hands each service its own configuration section. The TOML shape
//! mirrors that layout:
//!
//! ```toml
//! [extrema.observations.lightning_distance.min]
//! observation_name = "lightning_min_distance"
//! observation_time_name = "lightning_min_det_time"
//!
//! [extrema.counters.lightning_strike_count]
//! delta_name = "lightning_strike_delta"
//! rollover = "reset"
//!
//! [field_cache]
//! unit_system = "US"
//!
//! [field_cache.fields.outTemp]
//! expires_after = 300
//! ```
//!
//! Parsing is lenient, conversion to the domain types is not: every semantic
//! problem surfaces as [`WxError::Config`] from the conversion methods, which
//! the service loader treats as fatal for that one service.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::delta::{RolloverPolicy, TrackedCounter};
use crate::error::{WxError, WxResult};
use crate::extrema::{DerivedNames, ExtremaKind, TrackedObservation};
use crate::units::UnitRegistry;

/// Top-level settings, one optional section per service.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Extrema tracking service section.
    pub extrema: Option<ExtremaSettings>,
    /// Field cache service section.
    pub field_cache: Option<FieldCacheSettings>,
    /// Station-specific unit registrations.
    #[serde(default)]
    pub units: UnitsSettings,
}

/// Settings of the extrema tracking service.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExtremaSettings {
    /// Tracked source observations and their kind mappings.
    #[serde(default)]
    pub observations: BTreeMap<String, ObservationSettings>,
    /// Cumulative counters to derive per-sample deltas from.
    #[serde(default)]
    pub counters: BTreeMap<String, CounterSettings>,
}

/// Kind mappings of one tracked observation, keyed by kind name.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ObservationSettings {
    /// Maps `first` / `last` / `min` / `max` to derived output names.
    #[serde(flatten)]
    pub kinds: BTreeMap<String, DerivedNames>,
}

/// Settings of one cumulative counter field.
#[derive(Debug, Deserialize, Clone)]
pub struct CounterSettings {
    /// Field the per-sample delta is written to.
    pub delta_name: String,
    /// Rollover policy name: `reset`, `discard` or `wrap`.
    #[serde(default = "default_rollover")]
    pub rollover: String,
    /// Wrap point of the counter, required with `rollover = "wrap"`.
    pub modulus: Option<f64>,
}

/// Settings of the field cache service.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldCacheSettings {
    /// Unit system the cache operates in: `US`, `METRIC` or `METRICWX`.
    #[serde(default = "default_unit_system")]
    pub unit_system: String,
    /// Cached fields and their lifetimes.
    #[serde(default)]
    pub fields: BTreeMap<String, CachedFieldSettings>,
}

/// Cache behavior of one field.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CachedFieldSettings {
    /// Lifetime in seconds; absent means the value never expires.
    pub expires_after: Option<f64>,
}

/// Station-specific additions to the unit registry.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct UnitsSettings {
    /// Observation name to unit group.
    #[serde(default)]
    pub observations: BTreeMap<String, String>,
    /// Unit group to unit labels.
    #[serde(default)]
    pub groups: BTreeMap<String, GroupUnitsSettings>,
}

/// Unit labels of one group, either uniform or split per system.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GroupUnitsSettings {
    /// One label for every unit system.
    pub unit: Option<String>,
    /// Label in the US system.
    pub us: Option<String>,
    /// Label in the METRIC system.
    pub metric: Option<String>,
    /// Label in the METRICWX system.
    pub metricwx: Option<String>,
}

fn default_rollover() -> String {
    "reset".to_string()
}

fn default_unit_system() -> String {
    "US".to_string()
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> WxResult<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Parses settings from a TOML string.
    ///
    /// Keys keep their exact spelling. Observation names such as `outTemp`
    /// are case sensitive everywhere in the host, so the loader must not
    /// normalize them.
    pub fn from_toml_str(source: &str) -> WxResult<Self> {
        Ok(toml::from_str(source)?)
    }
}

impl ExtremaSettings {
    /// Converts the observation tables into tracked observations.
    ///
    /// An unknown kind key is a configuration error; structural problems
    /// such as duplicate output names are left to accumulator construction.
    pub fn tracked_observations(&self) -> WxResult<Vec<TrackedObservation>> {
        let mut observations = Vec::with_capacity(self.observations.len());
        for (source, settings) in &self.observations {
            let mut tracked = TrackedObservation::new(source.clone());
            for (kind_name, names) in &settings.kinds {
                let kind: ExtremaKind = kind_name.parse()?;
                tracked = tracked.track(
                    kind,
                    names.value_field.clone(),
                    names.time_field.clone(),
                );
            }
            observations.push(tracked);
        }
        Ok(observations)
    }

    /// Converts the counter tables into tracked counters.
    pub fn tracked_counters(&self) -> WxResult<Vec<TrackedCounter>> {
        let mut counters = Vec::with_capacity(self.counters.len());
        for (source, settings) in &self.counters {
            counters.push(TrackedCounter::new(
                source.clone(),
                settings.delta_name.clone(),
                settings.policy()?,
            ));
        }
        Ok(counters)
    }
}

impl CounterSettings {
    /// Resolves the rollover policy, checking the modulus against it.
    pub fn policy(&self) -> WxResult<RolloverPolicy> {
        let policy = match self.rollover.trim().to_ascii_lowercase().as_str() {
            "reset" => RolloverPolicy::Reset,
            "discard" => RolloverPolicy::Discard,
            "wrap" => {
                let modulus = self.modulus.ok_or_else(|| {
                    WxError::Config("rollover 'wrap' requires a modulus".to_string())
                })?;
                if !modulus.is_finite() || modulus <= 0.0 {
                    return Err(WxError::Config(format!(
                        "wrap modulus must be positive and finite, got {modulus}"
                    )));
                }
                return Ok(RolloverPolicy::Wrap { modulus });
            }
            other => {
                return Err(WxError::Config(format!(
                    "unknown rollover policy '{other}'"
                )))
            }
        };
        if self.modulus.is_some() {
            return Err(WxError::Config(format!(
                "modulus is only valid with rollover 'wrap', not '{}'",
                self.rollover
            )));
        }
        Ok(policy)
    }
}

impl UnitsSettings {
    /// Builds the unit registry: the standard seeds plus these additions.
    pub fn build(&self) -> WxResult<UnitRegistry> {
        let mut registry = UnitRegistry::standard();
        for (group, labels) in &self.groups {
            match (&labels.unit, &labels.us, &labels.metric, &labels.metricwx) {
                (Some(unit), None, None, None) => {
                    registry.register_uniform_group(group, unit);
                }
                (None, Some(us), Some(metric), Some(metricwx)) => {
                    registry.register_group(group, us, metric, metricwx);
                }
                _ => {
                    return Err(WxError::Config(format!(
                        "unit group '{group}' needs either 'unit' or all of \
                         'us', 'metric' and 'metricwx'"
                    )))
                }
            }
        }
        for (observation, group) in &self.observations {
            registry.register_observation(observation, group);
        }
        Ok(registry)
    }
}
