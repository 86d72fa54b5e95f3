//! Connection bootstrap utilities for SQLite-backed stores.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas the scheduling core relies on.
//!
//! # Invariants
//! - Returned stores have `foreign_keys=ON` and a busy timeout, so a second
//!   connection used by a dedicated queue waits instead of failing fast.
//! - Schema creation is the caller's job; nothing is migrated here.

use super::{SqliteStore, StoreResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file as a store.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_store(path: impl AsRef<Path>) -> StoreResult<SqliteStore> {
    open_with("file", || Connection::open(path))
}

/// Opens a private in-memory SQLite database as a store.
pub fn open_store_in_memory() -> StoreResult<SqliteStore> {
    open_with("memory", Connection::open_in_memory)
}

fn open_with(
    mode: &str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> StoreResult<SqliteStore> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let conn = match open().and_then(|conn| configure(&conn).map(|()| conn)) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    info!(
        "event=db_open module=db status=ok mode={} duration_ms={}",
        mode,
        started_at.elapsed().as_millis()
    );
    Ok(SqliteStore::new(conn))
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
