//! Connection pool for the history database.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::time::Duration;
use thiserror::Error;

/// Path that opens a private in-memory database instead of a file.
const IN_MEMORY_PATH: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Upper bound on pooled connections.
    pub pool_max_size: u32,

    /// How long a caller waits for a free pooled connection, in milliseconds.
    pub checkout_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            checkout_timeout_ms: 10_000,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors raised while opening the database.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open history database at '{path}': {source}")]
    Open {
        path: String,
        source: r2d2::Error,
    },
}

/// Opens a pool of SQLite connections to `db_path`.
///
/// Every connection is switched to WAL mode and given the configured busy
/// timeout. `:memory:` is accepted for tests; since each SQLite connection to
/// `:memory:` is a separate database, the pool is then limited to a single
/// connection so all callers see the same data.
///
/// # Errors
///
/// Returns `PoolError::Open` if the file cannot be opened or the initial
/// connection fails its setup pragmas.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!("journal_mode stayed at '{journal_mode}', expected wal")),
                ));
            }
            conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
        });

    let in_memory = db_path == IN_MEMORY_PATH;
    let max_size = if in_memory {
        1
    } else {
        settings.pool_max_size.max(1)
    };

    let mut builder = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_millis(settings.checkout_timeout_ms));
    if in_memory {
        // Recycling the only connection would drop the database with it.
        builder = builder.idle_timeout(None).max_lifetime(None);
    }

    let pool = builder
        .build(manager)
        .map_err(|source| PoolError::Open {
            path: db_path.to_string(),
            source,
        })?;

    tracing::debug!(path = db_path, max_size, "opened history database pool");

    Ok(pool)
}
