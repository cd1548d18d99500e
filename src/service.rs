//! Host-facing services and their loader.
//!
//! This module defines the `Service` trait, which wraps the crate's window
//! logic into plugins the host engine drives through its event loop. The
//! engine owns the loop structure: it opens an archive window, delivers live
//! samples while the window is open, and closes the window with a finalized
//! record that it then persists.
//!
//! ```text
//! on_window_start() ──> on_sample()* ──> on_window_close(record)
//!        ^                                        │
//!        └────────────────────────────────────────┘
//! ```
//!
//! Two services are built in:
//!
//! - [`ExtremaService`]: tracks first/last/min/max per window, stamps the
//!   running extrema onto every live sample, derives counter deltas, and
//!   merges the finalized extrema into the window record.
//! - [`FieldCacheService`]: backfills archive record fields from their last
//!   known value until a configured lifetime lapses.
//!
//! The [`ServiceSet`] loader builds each configured service independently. A
//! service whose configuration fails validation is logged and left out; the
//! rest of the set keeps running. At runtime, a service error on one sample
//! or record is logged and the remaining services still see the event.
//!
//! # Examples
//!
//! ```rust
//! use wx_services::config::Settings;
//! use wx_services::sample::Sample;
//! use wx_services::service::ServiceSet;
//!
//! let settings = Settings::from_toml_str(
//!     r#"
//!     [extrema.observations.lightning_distance.min]
//!     observation_name = "lightning_min_distance"
//!     observation_time_name = "lightning_min_det_time"
//!     "#,
//! )
//! .unwrap();
//! let mut services = ServiceSet::from_settings(&settings);
//!
//! services.window_start();
//! let mut sample = Sample::at(1_700_000_000);
//! sample.set("lightning_distance", 12.0);
//! services.sample(&mut sample);
//! assert_eq!(sample.number("lightning_min_distance"), Some(12.0));
//! ```

use std::collections::HashSet;

use chrono::Utc;
use log::{debug, error, info, trace, warn};

use crate::aggregate::AggregateQuery;
use crate::cache::FieldCache;
use crate::config::{ExtremaSettings, FieldCacheSettings, Settings};
use crate::delta::{CounterDelta, TrackedCounter};
use crate::error::{WxError, WxResult};
use crate::extrema::{ExtremaAccumulator, TrackedObservation};
use crate::sample::{Sample, Value, UNIT_SYSTEM};

/// A plugin driven by the host's archive-window event loop.
///
/// All hooks default to no-ops so a service only implements the events it
/// cares about. Hooks take `&mut self`; the loop is single threaded and
/// services keep their state without any locking.
pub trait Service: Send {
    /// Stable name of the service, used in log lines and diagnostics.
    fn name(&self) -> &str;

    /// Called once when a new archive window opens.
    fn on_window_start(&mut self) {}

    /// Called for every live sample while the window is open.
    ///
    /// The sample is mutable so the service can stamp derived fields onto
    /// it. Errors are logged by the caller; they do not stop the loop.
    fn on_sample(&mut self, _sample: &mut Sample) -> WxResult<()> {
        Ok(())
    }

    /// Called with the finalized record when the window closes, before the
    /// host persists it.
    fn on_window_close(&mut self, _record: &mut Sample) -> WxResult<()> {
        Ok(())
    }
}

struct CounterSlot {
    counter: TrackedCounter,
    stage: CounterDelta,
}

/// Tracks per-window extrema and cumulative-counter deltas.
pub struct ExtremaService {
    accumulator: ExtremaAccumulator,
    counters: Vec<CounterSlot>,
}

impl ExtremaService {
    /// Builds the service from explicit observations and counters.
    ///
    /// # Errors
    ///
    /// Fails on any accumulator construction error, on an invalid counter,
    /// on two counters sharing a delta field, and on a delta field that
    /// collides with a derived output. A delta field may deliberately equal
    /// a tracked source, which is how counter deltas get extrema of their
    /// own.
    pub fn new(
        observations: Vec<TrackedObservation>,
        counters: Vec<TrackedCounter>,
    ) -> WxResult<Self> {
        let accumulator = ExtremaAccumulator::new(observations)?;
        let outputs: HashSet<String> = accumulator
            .derived_fields()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut delta_names = HashSet::new();
        for counter in &counters {
            counter.validate()?;
            if outputs.contains(&counter.delta_name) {
                return Err(WxError::Config(format!(
                    "delta field '{}' collides with a derived output",
                    counter.delta_name
                )));
            }
            if !delta_names.insert(counter.delta_name.clone()) {
                return Err(WxError::Config(format!(
                    "delta field '{}' is produced more than once",
                    counter.delta_name
                )));
            }
        }

        Ok(Self {
            accumulator,
            counters: counters
                .into_iter()
                .map(|counter| CounterSlot {
                    stage: CounterDelta::new(counter.policy),
                    counter,
                })
                .collect(),
        })
    }

    /// Builds the service from its configuration section.
    ///
    /// A bare `[extrema]` section with no observations and no counters gets
    /// the canned lightning-distance tracking, which is what stations
    /// migrating from the fixed lightning setup expect.
    pub fn from_settings(settings: &ExtremaSettings) -> WxResult<Self> {
        let mut observations = settings.tracked_observations()?;
        let counters = settings.tracked_counters()?;
        if observations.is_empty() && counters.is_empty() {
            info!("no observations configured, tracking lightning distance");
            observations.push(TrackedObservation::lightning_distance());
        }
        Self::new(observations, counters)
    }

    /// The tracked observations, for building a matching query adapter.
    pub fn observations(&self) -> impl Iterator<Item = &TrackedObservation> {
        self.accumulator.observations()
    }

    /// A query adapter over this service's derived time fields.
    pub fn aggregate_query(&self) -> AggregateQuery {
        AggregateQuery::from_observations(self.observations())
    }

    /// Every field this service writes: derived outputs and delta fields.
    ///
    /// Deployments pass these to [`crate::archive::Archive::ensure_columns`]
    /// so the schema can hold the finalized records.
    pub fn derived_fields(&self) -> Vec<&str> {
        let mut fields = self.accumulator.derived_fields();
        fields.extend(self.counters.iter().map(|slot| slot.counter.delta_name.as_str()));
        fields
    }

    /// Forgets all counter baselines, as after a station restart.
    ///
    /// Counter baselines survive ordinary window boundaries; only a break in
    /// the sample stream itself warrants this.
    pub fn reset_counters(&mut self) {
        for slot in &mut self.counters {
            slot.stage.reset();
        }
    }
}

impl Service for ExtremaService {
    fn name(&self) -> &str {
        "extrema"
    }

    fn on_window_start(&mut self) {
        debug!("archive window opened, clearing extrema");
        self.accumulator.reset_window();
    }

    fn on_sample(&mut self, sample: &mut Sample) -> WxResult<()> {
        for slot in &mut self.counters {
            if let Some(total) = sample.number(&slot.counter.source) {
                if let Some(delta) = slot.stage.advance(total) {
                    sample.set(slot.counter.delta_name.clone(), delta);
                }
            }
        }
        self.accumulator.observe(sample)
    }

    fn on_window_close(&mut self, record: &mut Sample) -> WxResult<()> {
        self.accumulator.finalize_window().merge_into(record);
        trace!(
            "finalized record: {}",
            serde_json::to_string(record).unwrap_or_default()
        );
        Ok(())
    }
}

struct CachedField {
    name: String,
    expires_after: Option<f64>,
}

/// Backfills archive record fields from their last known value.
pub struct FieldCacheService {
    cache: FieldCache,
    fields: Vec<CachedField>,
}

impl FieldCacheService {
    /// Builds the service from its configuration section.
    pub fn from_settings(settings: &FieldCacheSettings) -> WxResult<Self> {
        let unit_system = settings.unit_system.parse()?;
        if settings.fields.is_empty() {
            warn!("field cache has no fields configured");
        }
        let fields = settings
            .fields
            .iter()
            .map(|(name, field)| CachedField {
                name: name.clone(),
                expires_after: field.expires_after,
            })
            .collect();
        Ok(Self {
            cache: FieldCache::new(unit_system),
            fields,
        })
    }

    /// Read-only view of the cache, for inspection.
    pub fn cache(&self) -> &FieldCache {
        &self.cache
    }
}

impl Service for FieldCacheService {
    fn name(&self) -> &str {
        "field_cache"
    }

    fn on_window_close(&mut self, record: &mut Sample) -> WxResult<()> {
        let now = Utc::now().timestamp();
        let unit_system = record
            .unit_system()
            .ok_or(WxError::MissingField(UNIT_SYSTEM))?;
        for field in &self.fields {
            match record.get(&field.name) {
                Some(value) => {
                    self.cache
                        .insert(&field.name, value.clone(), unit_system, now)?;
                }
                None => {
                    let cached = self.cache.get(&field.name, now, field.expires_after);
                    debug!(
                        "filling '{}' from cache: {}",
                        field.name,
                        if cached.is_some() { "hit" } else { "miss" }
                    );
                    record.set(field.name.clone(), cached.unwrap_or(Value::Null));
                }
            }
        }
        Ok(())
    }
}

/// An ordered set of services sharing the host's event loop.
#[derive(Default)]
pub struct ServiceSet {
    services: Vec<Box<dyn Service>>,
}

impl ServiceSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every configured service, skipping any whose configuration
    /// fails validation so one bad section cannot take the others down.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut set = Self::new();
        if let Some(extrema) = &settings.extrema {
            match ExtremaService::from_settings(extrema) {
                Ok(service) => set.push(Box::new(service)),
                Err(err) => error!("extrema service disabled: {err}"),
            }
        }
        if let Some(field_cache) = &settings.field_cache {
            match FieldCacheService::from_settings(field_cache) {
                Ok(service) => set.push(Box::new(service)),
                Err(err) => error!("field cache service disabled: {err}"),
            }
        }
        set
    }

    /// Adds a service to the end of the set.
    pub fn push(&mut self, service: Box<dyn Service>) {
        info!("registered service '{}'", service.name());
        self.services.push(service);
    }

    /// Number of loaded services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` when nothing loaded.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of the loaded services, in call order.
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    /// Delivers a window-start event to every service.
    pub fn window_start(&mut self) {
        for service in &mut self.services {
            service.on_window_start();
        }
    }

    /// Delivers a live sample to every service in order.
    ///
    /// A failing service is logged and the rest still see the sample.
    pub fn sample(&mut self, sample: &mut Sample) {
        for service in &mut self.services {
            if let Err(err) = service.on_sample(sample) {
                error!("service '{}' failed on sample: {err}", service.name());
            }
        }
    }

    /// Delivers the finalized record to every service in order.
    pub fn window_close(&mut self, record: &mut Sample) {
        for service in &mut self.services {
            if let Err(err) = service.on_window_close(record) {
                error!("service '{}' failed on record: {err}", service.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::RolloverPolicy;
    use crate::extrema::ExtremaKind;
    use crate::sample::DATE_TIME;

    fn lightning_settings() -> Settings {
        Settings::from_toml_str(
            r#"
            [extrema.observations.lightning_distance.first]
            observation_name = "lightning_first_distance"
            observation_time_name = "lightning_first_det_time"

            [extrema.observations.lightning_distance.min]
            observation_name = "lightning_min_distance"
            observation_time_name = "lightning_min_det_time"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn extrema_service_runs_a_full_window() {
        let settings = lightning_settings();
        let mut service = ExtremaService::from_settings(&settings.extrema.unwrap()).unwrap();

        service.on_window_start();
        for (time, distance) in [(100, 30.0), (160, 10.0)] {
            let mut sample = Sample::at(time);
            sample.set("lightning_distance", distance);
            service.on_sample(&mut sample).unwrap();
        }

        let mut record = Sample::at(300);
        service.on_window_close(&mut record).unwrap();
        assert_eq!(record.number("lightning_first_distance"), Some(30.0));
        assert_eq!(record.number("lightning_first_det_time"), Some(100.0));
        assert_eq!(record.number("lightning_min_distance"), Some(10.0));
        assert_eq!(record.number("lightning_min_det_time"), Some(160.0));
        assert_eq!(record.number(DATE_TIME), Some(300.0));
    }

    #[test]
    fn bare_section_defaults_to_lightning_tracking() {
        let service = ExtremaService::from_settings(&ExtremaSettings::default()).unwrap();
        let fields = service.derived_fields();
        assert_eq!(fields.len(), 8);
        assert!(fields.contains(&"lightning_max_det_time"));
    }

    #[test]
    fn counter_deltas_feed_tracked_extrema() {
        let settings = Settings::from_toml_str(
            r#"
            [extrema.counters.lightning_strike_count]
            delta_name = "lightning_strike_delta"

            [extrema.observations.lightning_strike_delta.max]
            observation_name = "lightning_max_strikes"
            observation_time_name = "lightning_max_strikes_time"
            "#,
        )
        .unwrap();
        let mut service = ExtremaService::from_settings(&settings.extrema.unwrap()).unwrap();

        service.on_window_start();

        // First total only primes the baseline: no delta, outputs null.
        let mut s1 = Sample::at(100);
        s1.set("lightning_strike_count", 100.0);
        service.on_sample(&mut s1).unwrap();
        assert!(!s1.contains("lightning_strike_delta"));
        assert!(s1.get("lightning_max_strikes").unwrap().is_null());

        let mut s2 = Sample::at(160);
        s2.set("lightning_strike_count", 103.0);
        service.on_sample(&mut s2).unwrap();
        assert_eq!(s2.number("lightning_strike_delta"), Some(3.0));
        assert_eq!(s2.number("lightning_max_strikes"), Some(3.0));

        let mut s3 = Sample::at(220);
        s3.set("lightning_strike_count", 104.0);
        service.on_sample(&mut s3).unwrap();
        assert_eq!(s3.number("lightning_strike_delta"), Some(1.0));
        assert_eq!(s3.number("lightning_max_strikes"), Some(3.0));
        assert_eq!(s3.number("lightning_max_strikes_time"), Some(160.0));
    }

    #[test]
    fn counter_baseline_survives_window_boundaries() {
        let mut service = ExtremaService::new(
            vec![TrackedObservation::new("strike_delta").track(
                ExtremaKind::Max,
                "max_strikes",
                "max_strikes_time",
            )],
            vec![TrackedCounter::new(
                "strike_total",
                "strike_delta",
                RolloverPolicy::Reset,
            )],
        )
        .unwrap();

        service.on_window_start();
        let mut s1 = Sample::at(100);
        s1.set("strike_total", 100.0);
        service.on_sample(&mut s1).unwrap();

        let mut record = Sample::at(300);
        service.on_window_close(&mut record).unwrap();
        service.on_window_start();

        let mut s2 = Sample::at(400);
        s2.set("strike_total", 106.0);
        service.on_sample(&mut s2).unwrap();
        assert_eq!(s2.number("strike_delta"), Some(6.0));

        service.reset_counters();
        let mut s3 = Sample::at(460);
        s3.set("strike_total", 110.0);
        service.on_sample(&mut s3).unwrap();
        assert!(!s3.contains("strike_delta"));
    }

    #[test]
    fn delta_field_may_not_shadow_a_derived_output() {
        let result = ExtremaService::new(
            vec![TrackedObservation::new("outTemp").track(
                ExtremaKind::Max,
                "out_max",
                "out_max_time",
            )],
            vec![TrackedCounter::new("rain_total", "out_max", RolloverPolicy::Reset)],
        );
        assert!(matches!(result, Err(WxError::Config(_))));
    }

    #[test]
    fn field_cache_backfills_missing_fields() {
        let settings = Settings::from_toml_str(
            r#"
            [field_cache.fields.outTemp]
            [field_cache.fields.outHumidity]
            "#,
        )
        .unwrap();
        let mut service =
            FieldCacheService::from_settings(&settings.field_cache.unwrap()).unwrap();

        let mut first = Sample::at(1_000);
        first.set(UNIT_SYSTEM, 1);
        first.set("outTemp", 71.2);
        service.on_window_close(&mut first).unwrap();
        // Absent field fills as null while the cache is empty.
        assert!(first.get("outHumidity").unwrap().is_null());

        let mut second = Sample::at(1_300);
        second.set(UNIT_SYSTEM, 1);
        service.on_window_close(&mut second).unwrap();
        assert_eq!(second.number("outTemp"), Some(71.2));
    }

    #[test]
    fn field_cache_rejects_foreign_unit_systems() {
        let settings = Settings::from_toml_str("[field_cache.fields.outTemp]\n").unwrap();
        let mut service =
            FieldCacheService::from_settings(&settings.field_cache.unwrap()).unwrap();

        let mut record = Sample::at(1_000);
        record.set(UNIT_SYSTEM, 16);
        record.set("outTemp", 21.8);
        let err = service.on_window_close(&mut record).unwrap_err();
        assert!(matches!(err, WxError::UnitMismatch { .. }));
    }

    #[test]
    fn record_without_unit_system_is_refused() {
        let settings = Settings::from_toml_str("[field_cache.fields.outTemp]\n").unwrap();
        let mut service =
            FieldCacheService::from_settings(&settings.field_cache.unwrap()).unwrap();

        let mut record = Sample::at(1_000);
        record.set("outTemp", 71.2);
        let err = service.on_window_close(&mut record).unwrap_err();
        assert!(matches!(err, WxError::MissingField(UNIT_SYSTEM)));
    }

    #[test]
    fn loader_skips_broken_services_and_keeps_the_rest() {
        let settings = Settings::from_toml_str(
            r#"
            # Both kinds claim the same output field.
            [extrema.observations.outTemp.min]
            observation_name = "out_extreme"
            observation_time_name = "out_extreme_time"

            [extrema.observations.outTemp.max]
            observation_name = "out_extreme"
            observation_time_name = "out_extreme_time"

            [field_cache.fields.outTemp]
            expires_after = 300
            "#,
        )
        .unwrap();

        let services = ServiceSet::from_settings(&settings);
        assert_eq!(services.names(), vec!["field_cache"]);
    }

    #[test]
    fn service_set_keeps_going_after_a_runtime_error() {
        let settings = Settings::from_toml_str(
            r#"
            [extrema.observations.lightning_distance.last]
            observation_name = "lightning_last_distance"
            observation_time_name = "lightning_last_det_time"

            [field_cache.fields.outTemp]
            "#,
        )
        .unwrap();
        let mut services = ServiceSet::from_settings(&settings);
        assert_eq!(services.len(), 2);

        services.window_start();
        let mut sample = Sample::at(100);
        sample.set("lightning_distance", 17.0);
        services.sample(&mut sample);

        // No usUnits: the cache service errors, the extrema merge still ran.
        let mut record = Sample::at(300);
        services.window_close(&mut record);
        assert_eq!(record.number("lightning_last_distance"), Some(17.0));
    }
}
