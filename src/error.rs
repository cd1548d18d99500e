//! Custom error types for the service collection.
//!
//! This module defines the primary error type, `WxError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different kinds of failures the services can hit, from
//! configuration problems to archive queries.
//!
//! ## Error Hierarchy
//!
//! `WxError` is an enum that consolidates the error sources:
//!
//! - **`Config`**: Semantic errors in the configuration, such as duplicate
//!   derived field names or a malformed aggregation-kind mapping. These pass
//!   parsing but are logically incorrect, and are caught during validation.
//! - **`ConfigFile` / `Io`**: The configuration file itself was not valid
//!   TOML, or could not be read from disk at all.
//! - **`UnknownField` / `UnsupportedAggregation`**: Typed failures on the
//!   query path, returned to the reporting caller instead of panicking.
//! - **`UnitMismatch` / `MissingField`**: Contract violations in records
//!   handed over by the host engine.
//! - **`Storage`**: Wraps `rusqlite` errors from the archive database.
//!
//! Failure policy follows the host engine: a configuration error is fatal to
//! the service being constructed (the loader logs it and disables that service
//! only), query-path errors go back to the caller as values, and missing or
//! null observation data on the live sample path is never an error at all.

use thiserror::Error;

use crate::extrema::ExtremaKind;
use crate::units::UnitSystem;

/// Convenience alias for results using the crate error type.
pub type WxResult<T> = std::result::Result<T, WxError>;

/// Errors raised by the services and the aggregate query path.
#[derive(Error, Debug)]
pub enum WxError {
    /// Semantic configuration error caught during validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration file could not be parsed as TOML.
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// A configuration file could not be read from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A query named a field that is not registered as a derived time field,
    /// or the deployed archive schema has no column for it.
    #[error("Unknown derived field '{0}'")]
    UnknownField(String),

    /// A query asked a registered field for an aggregation kind other than
    /// the one it was registered under.
    #[error("Aggregation '{kind}' is not supported for field '{field}'")]
    UnsupportedAggregation {
        /// The queried field name.
        field: String,
        /// The requested aggregation kind.
        kind: ExtremaKind,
    },

    /// A record carried a different unit system than the cache it was being
    /// written into.
    #[error("Record unit system {record} does not match cache unit system {cache}")]
    UnitMismatch {
        /// Unit system of the incoming record.
        record: UnitSystem,
        /// Unit system the cache was built with.
        cache: UnitSystem,
    },

    /// A sample or record is missing a field the host contract requires,
    /// such as the `dateTime` observation timestamp.
    #[error("Record is missing required field '{0}'")]
    MissingField(&'static str),

    /// An error from the underlying archive database.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}
