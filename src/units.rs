//! Unit systems and unit-group metadata.
//!
//! Records carry a unit-system code in their `usUnits` field; derived fields
//! are tagged for reporting with a unit group and the group's unit label in
//! the record's system. The [`UnitRegistry`] holds both mappings and can be
//! extended from the configuration for station-specific observations.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WxError;

/// Unit group of timestamps.
pub const GROUP_TIME: &str = "group_time";

/// Unit label of epoch-second timestamps, identical in every unit system.
pub const UNIT_UNIX_EPOCH: &str = "unix_epoch";

/// The three unit systems records may be expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitSystem {
    /// United States customary units, code 1.
    Us,
    /// Metric with km/h wind speeds, code 16.
    Metric,
    /// Metric with m/s wind speeds and mm rain, code 17.
    MetricWx,
}

impl UnitSystem {
    /// The wire code stored in the `usUnits` field.
    pub const fn code(self) -> i64 {
        match self {
            UnitSystem::Us => 1,
            UnitSystem::Metric => 16,
            UnitSystem::MetricWx => 17,
        }
    }

    /// Decodes a `usUnits` code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(UnitSystem::Us),
            16 => Some(UnitSystem::Metric),
            17 => Some(UnitSystem::MetricWx),
            _ => None,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitSystem::Us => "US",
            UnitSystem::Metric => "METRIC",
            UnitSystem::MetricWx => "METRICWX",
        };
        write!(f, "{name}")
    }
}

impl FromStr for UnitSystem {
    type Err = WxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(UnitSystem::Us),
            "METRIC" => Ok(UnitSystem::Metric),
            "METRICWX" => Ok(UnitSystem::MetricWx),
            other => Err(WxError::Config(format!("unknown unit system '{other}'"))),
        }
    }
}

/// Unit labels of one group across the three systems.
#[derive(Clone, Debug, PartialEq)]
struct GroupUnits {
    us: String,
    metric: String,
    metricwx: String,
}

impl GroupUnits {
    fn uniform(unit: &str) -> Self {
        Self {
            us: unit.to_string(),
            metric: unit.to_string(),
            metricwx: unit.to_string(),
        }
    }

    fn get(&self, system: UnitSystem) -> &str {
        match system {
            UnitSystem::Us => &self.us,
            UnitSystem::Metric => &self.metric,
            UnitSystem::MetricWx => &self.metricwx,
        }
    }
}

/// Maps observation names to unit groups and unit groups to unit labels.
#[derive(Clone, Debug, Default)]
pub struct UnitRegistry {
    groups: HashMap<String, String>,
    units: HashMap<String, GroupUnits>,
}

impl UnitRegistry {
    /// An empty registry with no mappings at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with the standard groups the services rely on.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_uniform_group(GROUP_TIME, UNIT_UNIX_EPOCH);
        registry.register_uniform_group("group_count", "count");
        registry.register_group("group_distance", "mile", "km", "km");
        registry.register_observation(crate::sample::DATE_TIME, GROUP_TIME);
        registry.register_observation("distance", "group_distance");
        registry
    }

    /// Assigns an observation name to a unit group.
    pub fn register_observation(&mut self, observation: &str, group: &str) {
        self.groups
            .insert(observation.to_string(), group.to_string());
    }

    /// Registers a group with per-system unit labels.
    pub fn register_group(&mut self, group: &str, us: &str, metric: &str, metricwx: &str) {
        self.units.insert(
            group.to_string(),
            GroupUnits {
                us: us.to_string(),
                metric: metric.to_string(),
                metricwx: metricwx.to_string(),
            },
        );
    }

    /// Registers a group whose unit label is the same in every system.
    pub fn register_uniform_group(&mut self, group: &str, unit: &str) {
        self.units
            .insert(group.to_string(), GroupUnits::uniform(unit));
    }

    /// The unit group an observation belongs to.
    pub fn group_of(&self, observation: &str) -> Option<&str> {
        self.groups.get(observation).map(String::as_str)
    }

    /// The unit label of a group in the given system.
    pub fn unit_of(&self, group: &str, system: UnitSystem) -> Option<&str> {
        self.units.get(group).map(|u| u.get(system))
    }

    /// Resolves an observation to its `(unit, group)` tag in one step.
    pub fn tag(&self, observation: &str, system: UnitSystem) -> Option<(String, String)> {
        let group = self.group_of(observation)?;
        let unit = self.unit_of(group, system)?;
        Some((unit.to_string(), group.to_string()))
    }
}
