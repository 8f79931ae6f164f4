//! SQLite plumbing for the garage history service.
//!
//! Provides a pooled SQLite handle (via `r2d2`) opened in WAL mode, and the
//! idempotent creation of the `garage_history` table that backs the event log.
//!
//! # Design decisions
//!
//! - **WAL journal mode**: update messages and history queries arrive on
//!   independent tasks, so readers must not block the single writer.
//! - **Busy timeout instead of in-process locks**: concurrent appends are
//!   serialised by SQLite itself; a writer that finds the database locked
//!   waits up to `busy_timeout_ms` before failing.
//! - **No migrations**: the schema is a single table created with
//!   `CREATE TABLE IF NOT EXISTS` on every startup.

mod pool;
mod schema;

pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use schema::{ensure_schema, SchemaError, HISTORY_TABLE_NAME};
