//! SQLite access to the host's archive table.
//!
//! The host engine persists one record per archive window into a single
//! `archive` table keyed by `dateTime`. [`Archive`] wraps the connection with
//! just the operations the services and the aggregate query path need:
//! creating the base schema, widening it with derived columns, inserting
//! finalized records and running single-value queries.

use std::path::Path;

use rusqlite::config::DbConfig;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};

use crate::error::{WxError, WxResult};
use crate::sample::{is_identifier, Sample, Value};

/// Name of the archive table.
pub const TABLE: &str = "archive";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Number(n) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Number(i as f64)),
            ValueRef::Real(r) => Ok(Value::Number(r)),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

/// Connection to an archive database.
pub struct Archive {
    conn: Connection,
}

impl Archive {
    /// Opens an archive database file, creating the base schema if needed.
    pub fn open(path: impl AsRef<Path>) -> WxResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens a fresh in-memory archive, used by the tests.
    pub fn open_in_memory() -> WxResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> WxResult<Self> {
        // Double-quoted tokens are identifiers, never string literals, so a
        // query against a missing derived column fails instead of reading the
        // column name back as text.
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DDL, false)?;
        conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} ( \
                 dateTime INTEGER NOT NULL UNIQUE PRIMARY KEY, \
                 usUnits INTEGER NOT NULL, \
                 interval INTEGER NOT NULL)"
            ),
            [],
        )?;
        Ok(Self { conn })
    }

    /// Names of all columns currently in the archive table.
    pub fn columns(&self) -> WxResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Adds any of the given fields missing from the schema as REAL columns.
    ///
    /// Deployments grow their schema this way when a new derived field is
    /// configured. Field names must be plain identifiers; they are quoted
    /// into the statement, so names that collide with SQL keywords work.
    pub fn ensure_columns<S: AsRef<str>>(&self, fields: &[S]) -> WxResult<()> {
        let existing = self.columns()?;
        for field in fields {
            let field = field.as_ref();
            if !is_identifier(field) {
                return Err(WxError::Config(format!(
                    "invalid archive column name '{field}'"
                )));
            }
            if !existing.iter().any(|c| c == field) {
                self.conn.execute(
                    &format!("ALTER TABLE {TABLE} ADD COLUMN \"{field}\" REAL"),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Inserts one archive record, one column per field in the record.
    pub fn insert(&self, record: &Sample) -> WxResult<()> {
        if record.is_empty() {
            return Ok(());
        }
        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (field, value) in record.iter() {
            if !is_identifier(field) {
                return Err(WxError::Config(format!(
                    "invalid archive column name '{field}'"
                )));
            }
            columns.push(format!("\"{field}\""));
            values.push(value);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {TABLE} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    /// Runs a query expected to produce at most one single-column row,
    /// returning its value when the row exists and the value is non-null.
    pub(crate) fn select_one_f64(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> WxResult<Option<f64>> {
        let row = self
            .conn
            .query_row(sql, params, |row| row.get::<_, Option<f64>>(0))
            .optional()?;
        Ok(row.flatten())
    }
}

/// Whether a storage error means the queried column does not exist in the
/// deployed schema.
///
/// A missing column usually surfaces while the statement is prepared, as
/// [`rusqlite::Error::SqlInputError`]; failures stepping an already prepared
/// statement carry the same message inside a `SqliteFailure`.
pub(crate) fn is_missing_column(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqlInputError { msg, .. } => msg.starts_with("no such column"),
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            message.starts_with("no such column")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{DATE_TIME, INTERVAL, UNIT_SYSTEM};

    fn record(time: i64, distance: Option<f64>) -> Sample {
        let mut r = Sample::at(time);
        r.set(UNIT_SYSTEM, 1);
        r.set(INTERVAL, 5);
        r.set("lightning_min_distance", distance);
        r
    }

    #[test]
    fn creates_base_schema() {
        let archive = Archive::open_in_memory().unwrap();
        let columns = archive.columns().unwrap();
        assert_eq!(columns, vec![DATE_TIME, UNIT_SYSTEM, INTERVAL]);
    }

    #[test]
    fn ensure_columns_is_idempotent() {
        let archive = Archive::open_in_memory().unwrap();
        archive
            .ensure_columns(&["lightning_min_distance", "lightning_min_det_time"])
            .unwrap();
        archive
            .ensure_columns(&["lightning_min_distance"])
            .unwrap();

        let columns = archive.columns().unwrap();
        assert!(columns.iter().any(|c| c == "lightning_min_distance"));
        assert!(columns.iter().any(|c| c == "lightning_min_det_time"));
    }

    #[test]
    fn rejects_unsafe_column_names() {
        let archive = Archive::open_in_memory().unwrap();
        let result = archive.ensure_columns(&["x; DROP TABLE archive"]);
        assert!(matches!(result, Err(WxError::Config(_))));
    }

    #[test]
    fn inserts_and_reads_back_records() {
        let archive = Archive::open_in_memory().unwrap();
        archive.ensure_columns(&["lightning_min_distance"]).unwrap();
        archive.insert(&record(1_000, Some(12.5))).unwrap();
        archive.insert(&record(1_300, None)).unwrap();

        let value = archive
            .select_one_f64(
                &format!("SELECT lightning_min_distance FROM {TABLE} WHERE dateTime = ?"),
                &[&1_000_i64],
            )
            .unwrap();
        assert_eq!(value, Some(12.5));

        let null = archive
            .select_one_f64(
                &format!("SELECT lightning_min_distance FROM {TABLE} WHERE dateTime = ?"),
                &[&1_300_i64],
            )
            .unwrap();
        assert_eq!(null, None);
    }

    #[test]
    fn missing_rows_are_not_errors() {
        let archive = Archive::open_in_memory().unwrap();
        let value = archive
            .select_one_f64(&format!("SELECT dateTime FROM {TABLE}"), &[])
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn detects_missing_columns() {
        let archive = Archive::open_in_memory().unwrap();
        let err = archive
            .select_one_f64(&format!("SELECT no_such_field FROM {TABLE}"), &[])
            .unwrap_err();
        match err {
            WxError::Storage(inner) => {
                assert!(matches!(inner, rusqlite::Error::SqlInputError { .. }));
                assert!(is_missing_column(&inner));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn keyword_column_names_round_trip() {
        let archive = Archive::open_in_memory().unwrap();
        archive.ensure_columns(&["order", "group"]).unwrap();

        let mut r = Sample::at(1_000);
        r.set(UNIT_SYSTEM, 1);
        r.set(INTERVAL, 5);
        r.set("order", 3.0);
        r.set("group", Value::Null);
        archive.insert(&r).unwrap();

        let value = archive
            .select_one_f64(
                &format!("SELECT \"order\" FROM {TABLE} WHERE dateTime = ?"),
                &[&1_000_i64],
            )
            .unwrap();
        assert_eq!(value, Some(3.0));
    }
}
