use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use crate::error::StorageError;

pub type ConnectionPool = Pool<SqliteConnectionManager>;
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

fn init_connection(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}

/// Open a pooled connection to the database file, creating parent directories
pub fn open_pool(path: &Path, max_size: u32) -> Result<Arc<ConnectionPool>, StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Pool(e.to_string()))?;
    }

    debug!(path = %path.display(), max_size = max_size, "Opening database pool");

    let manager = SqliteConnectionManager::file(path).with_init(init_connection);
    let pool = Pool::builder().max_size(max_size.max(1)).build(manager)?;

    Ok(Arc::new(pool))
}

/// Single connection in-memory pool, every connection would otherwise see its own database
pub fn open_memory_pool() -> Result<Arc<ConnectionPool>, StorageError> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager)?;

    Ok(Arc::new(pool))
}
