//! Last-known-value cache for archive record fields.
//!
//! Stations with flaky sensors produce archive records where a field is
//! present in one record and missing from the next. The [`FieldCache`] keeps
//! the most recent value of selected fields together with the moment it was
//! cached, and hands it back until a configured expiry lapses. All entries
//! share one unit system; mixing systems in a cache would silently corrupt
//! the readings, so it is refused.

use std::collections::HashMap;

use crate::error::{WxError, WxResult};
use crate::sample::Value;
use crate::units::UnitSystem;

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    stamped_at: i64,
}

/// Cache of the most recent value per field, all in one unit system.
#[derive(Clone, Debug)]
pub struct FieldCache {
    unit_system: UnitSystem,
    entries: HashMap<String, Entry>,
}

impl FieldCache {
    /// Creates an empty cache bound to a unit system.
    pub fn new(unit_system: UnitSystem) -> Self {
        Self {
            unit_system,
            entries: HashMap::new(),
        }
    }

    /// The unit system every cached value is expressed in.
    pub fn unit_system(&self) -> UnitSystem {
        self.unit_system
    }

    /// Returns the cached value of a field if it has not expired by `now`.
    ///
    /// `expires_after` is a lifetime in seconds; `None` never expires, and a
    /// lifetime of zero is always expired.
    pub fn get(&self, field: &str, now: i64, expires_after: Option<f64>) -> Option<Value> {
        let entry = self.entries.get(field)?;
        let fresh = match expires_after {
            None => true,
            Some(lifetime) => ((now - entry.stamped_at) as f64) < lifetime,
        };
        fresh.then(|| entry.value.clone())
    }

    /// Caches a value observed at `now`, replacing any previous entry.
    ///
    /// The record's unit system must match the cache's.
    pub fn insert(
        &mut self,
        field: &str,
        value: Value,
        unit_system: UnitSystem,
        now: i64,
    ) -> WxResult<()> {
        if unit_system != self.unit_system {
            return Err(WxError::UnitMismatch {
                record: unit_system,
                cache: self.unit_system,
            });
        }
        self.entries.insert(
            field.to_string(),
            Entry {
                value,
                stamped_at: now,
            },
        );
        Ok(())
    }

    /// Refreshes the stamp of an existing entry without changing its value.
    pub fn touch(&mut self, field: &str, now: i64) {
        if let Some(entry) = self.entries.get_mut(field) {
            entry.stamped_at = now;
        }
    }

    /// Drops one field from the cache.
    pub fn remove(&mut self, field: &str) {
        self.entries.remove(field);
    }

    /// Drops every cached field.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_returns_values() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        cache
            .insert("outTemp", Value::Number(71.2), UnitSystem::Us, 1_000)
            .unwrap();

        assert_eq!(
            cache.get("outTemp", 5_000, None),
            Some(Value::Number(71.2))
        );
        assert_eq!(cache.get("inTemp", 5_000, None), None);
    }

    #[test]
    fn lifetime_is_a_strict_bound() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        cache
            .insert("outTemp", Value::Number(71.2), UnitSystem::Us, 1_000)
            .unwrap();

        assert!(cache.get("outTemp", 1_299, Some(300.0)).is_some());
        assert!(cache.get("outTemp", 1_300, Some(300.0)).is_none());
    }

    #[test]
    fn zero_lifetime_is_always_expired() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        cache
            .insert("outTemp", Value::Number(71.2), UnitSystem::Us, 1_000)
            .unwrap();

        assert!(cache.get("outTemp", 1_000, Some(0.0)).is_none());
    }

    #[test]
    fn mismatched_unit_system_is_refused() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        let result = cache.insert("outTemp", Value::Number(21.8), UnitSystem::Metric, 1_000);
        assert!(matches!(result, Err(WxError::UnitMismatch { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn touch_extends_an_entry_without_rewriting_it() {
        let mut cache = FieldCache::new(UnitSystem::Metric);
        cache
            .insert("barometer", Value::Number(1_013.2), UnitSystem::Metric, 1_000)
            .unwrap();

        cache.touch("barometer", 2_000);
        assert_eq!(
            cache.get("barometer", 2_100, Some(300.0)),
            Some(Value::Number(1_013.2))
        );
        // Touching an unknown field does not create it.
        cache.touch("ghost", 2_000);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn text_values_are_cacheable() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        cache
            .insert("stationText", Value::from("sunny"), UnitSystem::Us, 1_000)
            .unwrap();
        assert_eq!(
            cache.get("stationText", 1_001, None),
            Some(Value::Text("sunny".to_string()))
        );
    }

    #[test]
    fn remove_and_clear_drop_entries() {
        let mut cache = FieldCache::new(UnitSystem::Us);
        cache
            .insert("a", Value::Number(1.0), UnitSystem::Us, 10)
            .unwrap();
        cache
            .insert("b", Value::Number(2.0), UnitSystem::Us, 10)
            .unwrap();

        cache.remove("a");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
