//! Persistence for the door status log.
//!
//! All writes go through [`EventStore::append`], which inserts one row in its
//! own immediate transaction. Reads go through [`EventStore::query_range`] and
//! [`EventStore::query_latest`], each inside a deferred transaction so a
//! query never observes a half-applied write.

use garage_db::DbPool;
use rusqlite::{params, Params, Row, TransactionBehavior};

use crate::error::StorageError;
use crate::event::StatusEvent;

// Existing databases may already hold duplicate rows, so redelivery is
// detected with a lookup under the write lock instead of a unique index.
const INSERT_EVENT: &str = "INSERT INTO garage_history (garage_id, status, timestamp)
     SELECT ?1, ?2, ?3
     WHERE NOT EXISTS (
         SELECT 1 FROM garage_history
         WHERE garage_id = ?1 AND timestamp = ?3 AND status = ?2
     )";

const SELECT_RANGE: &str = "SELECT garage_id, status, timestamp
     FROM garage_history
     WHERE timestamp BETWEEN ?1 AND ?2
     ORDER BY timestamp ASC, id ASC";

const SELECT_LATEST: &str = "SELECT garage_id, status, timestamp
     FROM garage_history
     ORDER BY timestamp DESC, id DESC
     LIMIT 1";

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was written.
    Inserted,
    /// An identical event was already stored; nothing was written.
    Duplicate,
}

/// Handle to the `garage_history` table.
///
/// Cloning is cheap and every clone shares the same connection pool, so one
/// store can be handed to any number of concurrent handlers.
#[derive(Clone)]
pub struct EventStore {
    pool: DbPool,
}

impl EventStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates the history table if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Pool` if no connection is available and
    /// `StorageError::Schema` if the DDL fails.
    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get()?;
        garage_db::ensure_schema(&conn)?;
        Ok(())
    }

    /// Appends one event.
    ///
    /// Runs begin, prepare, execute and commit on a single connection. If any
    /// step fails the transaction is dropped uncommitted, which rolls it back.
    /// An event identical to a stored one (same door, timestamp and status)
    /// is not written again and reports [`AppendOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on pool exhaustion, a constraint violation, or
    /// any SQLite failure.
    pub fn append(&self, event: &StatusEvent) -> Result<AppendOutcome, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = {
            let mut stmt = tx.prepare_cached(INSERT_EVENT)?;
            stmt.execute(params![event.door_name, event.status, event.changed_at])?
        };

        tx.commit()?;

        Ok(if inserted == 0 {
            AppendOutcome::Duplicate
        } else {
            AppendOutcome::Inserted
        })
    }

    /// Returns all events with `start <= changed_at <= end`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on SQL failure.
    pub fn query_range(&self, start: i64, end: i64) -> Result<Vec<StatusEvent>, StorageError> {
        self.read(SELECT_RANGE, params![start, end])
    }

    /// Returns the most recent event, or an empty vector if none is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on SQL failure.
    pub fn query_latest(&self) -> Result<Vec<StatusEvent>, StorageError> {
        self.read(SELECT_LATEST, [])
    }

    /// Releases this handle's share of the connection pool.
    ///
    /// Connections are closed once the last clone of the store is dropped.
    pub fn close(self) {
        let state = self.pool.state();
        tracing::info!(
            connections = state.connections,
            idle = state.idle_connections,
            "closing history store"
        );
    }

    fn read<P: Params>(&self, sql: &str, params: P) -> Result<Vec<StatusEvent>, StorageError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mut events = Vec::new();
        {
            let mut stmt = tx.prepare_cached(sql)?;
            let rows = stmt.query_map(params, map_row_to_event)?;
            for row in rows {
                events.push(row?);
            }
        }

        tx.commit()?;
        Ok(events)
    }
}

fn map_row_to_event(row: &Row<'_>) -> rusqlite::Result<StatusEvent> {
    Ok(StatusEvent {
        door_name: row.get(0)?,
        status: row.get(1)?,
        changed_at: row.get(2)?,
    })
}
