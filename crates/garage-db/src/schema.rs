//! Creation of the `garage_history` table.
//!
//! The statement is embedded at compile time and only uses
//! `IF NOT EXISTS` clauses, so running it against a database that already
//! holds the table is a no-op.

use rusqlite::Connection;
use thiserror::Error;

pub const HISTORY_TABLE_NAME: &str = "garage_history";

const CREATE_HISTORY_TABLE: &str = include_str!("schema/garage_history.sql");

/// Failure to create the history table.
#[derive(Debug, Error)]
#[error("failed to create table '{table}': {source}")]
pub struct SchemaError {
    pub table: &'static str,
    #[source]
    pub source: rusqlite::Error,
}

/// Creates the history table and its indexes if they are missing.
///
/// The DDL runs inside one transaction, so a failure part-way leaves the
/// database as it was.
///
/// # Errors
///
/// Returns `SchemaError` if the transaction cannot be opened, a statement
/// fails (permissions, read-only file, corrupt database), or the commit fails.
pub fn ensure_schema(conn: &Connection) -> Result<(), SchemaError> {
    let wrap = |source| SchemaError {
        table: HISTORY_TABLE_NAME,
        source,
    };

    tracing::debug!(sql = CREATE_HISTORY_TABLE, "ensuring history table exists");

    let tx = conn.unchecked_transaction().map_err(wrap)?;
    tx.execute_batch(CREATE_HISTORY_TABLE).map_err(wrap)?;
    tx.commit().map_err(wrap)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [HISTORY_TABLE_NAME],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn creates_table_on_fresh_db() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        ensure_schema(&conn).expect("schema should be created");
        assert_eq!(table_count(&conn), 1);
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        ensure_schema(&conn).expect("first call should succeed");
        ensure_schema(&conn).expect("second call should succeed");
        assert_eq!(table_count(&conn), 1, "no duplicate table");
    }

    #[test]
    fn status_check_rejects_unknown_values() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        ensure_schema(&conn).expect("schema should be created");

        for status in ["Open", "CLOSED", "O", "C", "ajar"] {
            let result = conn.execute(
                "INSERT INTO garage_history (garage_id, timestamp, status) VALUES ('left', 10, ?1)",
                [status],
            );
            assert!(result.is_err(), "status '{status}' should violate the CHECK");
        }

        let stored: i64 = conn
            .query_row("SELECT COUNT(*) FROM garage_history", [], |row| row.get(0))
            .expect("should count rows");
        assert_eq!(stored, 0);
    }

    #[test]
    fn timestamp_defaults_to_now() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        ensure_schema(&conn).expect("schema should be created");

        conn.execute(
            "INSERT INTO garage_history (garage_id, status) VALUES ('left', 'open')",
            [],
        )
        .expect("insert without timestamp should succeed");

        let ts: i64 = conn
            .query_row("SELECT timestamp FROM garage_history", [], |row| row.get(0))
            .expect("should read timestamp");
        assert!(ts > 1_600_000_000, "default should be the current epoch second");
    }

    #[test]
    fn legacy_table_with_duplicate_rows_is_accepted() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        conn.execute_batch(
            "create table if not exists garage_history (id integer not null primary key, \
             garage_id text not null, timestamp timestamp default CURRENT_TIMESTAMP not null, \
             status text check( status in ('open','closed') ) not null);
             insert into garage_history (garage_id, status, timestamp) values ('left', 'open', 100);
             insert into garage_history (garage_id, status, timestamp) values ('left', 'open', 100);",
        )
        .expect("should create legacy table");

        ensure_schema(&conn).expect("existing duplicates must not block startup");

        let stored: i64 = conn
            .query_row("SELECT COUNT(*) FROM garage_history", [], |row| row.get(0))
            .expect("should count rows");
        assert_eq!(stored, 2, "existing rows are left untouched");
    }

    #[test]
    fn read_only_database_reports_schema_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("history.db");
        std::fs::File::create(&path).expect("should create empty db file");

        let conn = Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
            .expect("should open read-only");
        let err = ensure_schema(&conn).expect_err("read-only db cannot create tables");
        assert_eq!(err.table, HISTORY_TABLE_NAME);
    }
}
