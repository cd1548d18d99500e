//! # Observation Window Services
//!
//! This crate implements plugin services for a weather-station acquisition
//! engine. The engine samples station hardware at high rate, groups the
//! samples into fixed archive windows, and persists one record per window
//! into a SQLite archive. The services here ride that loop: they track
//! per-window extrema of selected observations, stamp the running results
//! onto every live sample, fold them into the finalized record, and later
//! answer retrospective aggregate queries straight from the archive.
//!
//! ## Crate Structure
//!
//! The library is organized into modules, each with a distinct
//! responsibility:
//!
//! - **`sample`**: The flat observation map the engine passes around, both
//!   as live sample and as archive record.
//! - **`extrema`**: The per-window first/last/min/max accumulator and its
//!   tracked-observation configuration.
//! - **`delta`**: Pre-processing of cumulative counters into per-sample
//!   deltas, with configurable rollover handling.
//! - **`cache`**: A last-known-value cache for intermittently reporting
//!   fields.
//! - **`archive`**: Thin SQLite access to the engine's archive table.
//! - **`aggregate`**: The query adapter answering first/last/min/max
//!   questions over historical spans.
//! - **`units`**: Unit systems and the unit-group registry used to tag
//!   query results.
//! - **`service`**: The `Service` trait the engine drives, the built-in
//!   services and the loader that assembles them from configuration.
//! - **`config`**: Configuration structures loaded from TOML files. See
//!   `config::Settings`.
//! - **`error`**: The custom `WxError` enum for centralized error handling.

pub mod aggregate;
pub mod archive;
pub mod cache;
pub mod config;
pub mod delta;
pub mod error;
pub mod extrema;
pub mod sample;
pub mod service;
pub mod units;
