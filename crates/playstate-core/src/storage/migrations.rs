use rusqlite::{params, Connection};
use tracing::info;
use crate::error::{query_error, StorageError};

/// Increment when adding a migration
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    Down,
}

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS state (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL,
        updated INTEGER NOT NULL,
        watched INTEGER NOT NULL DEFAULT 0,
        via TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        year INTEGER NULL,
        season INTEGER NULL,
        episode INTEGER NULL,
        parent TEXT NOT NULL DEFAULT '{}',
        guids TEXT NOT NULL DEFAULT '{}',
        suids TEXT NOT NULL DEFAULT '{}',
        extra TEXT NOT NULL DEFAULT '{}'
    );
    CREATE INDEX IF NOT EXISTS state_updated ON state (updated);
    CREATE INDEX IF NOT EXISTS state_type ON state (type);

    CREATE TABLE IF NOT EXISTS state_pointers (
        pointer TEXT NOT NULL,
        state_id INTEGER NOT NULL REFERENCES state (id) ON DELETE CASCADE,
        PRIMARY KEY (pointer, state_id)
    );
    CREATE INDEX IF NOT EXISTS state_pointers_state ON state_pointers (state_id);

    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY NOT NULL,
        status INTEGER NOT NULL DEFAULT 0,
        reference TEXT NULL,
        event TEXT NOT NULL,
        event_data TEXT NOT NULL DEFAULT '{}',
        options TEXT NOT NULL DEFAULT '{}',
        attempts INTEGER NOT NULL DEFAULT 0,
        logs TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NULL
    );
    CREATE INDEX IF NOT EXISTS events_reference ON events (reference);
    CREATE INDEX IF NOT EXISTS events_status ON events (status);
    CREATE INDEX IF NOT EXISTS events_created_at ON events (created_at);
";

const DROP_V1: &str = "
    DROP TABLE IF EXISTS state_pointers;
    DROP TABLE IF EXISTS state;
    DROP TABLE IF EXISTS events;
";

/// Returns 0 when the schema_version table does not exist yet
pub fn schema_version(conn: &Connection) -> Result<i32, StorageError> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )
        .map_err(query_error("schema_version", ()))?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .map_err(query_error("schema_version", ()))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![version, chrono::Utc::now().to_rfc3339()],
    )
    .map_err(query_error("set_schema_version", version))?;
    Ok(())
}

/// Apply or revert the schema, safe to call repeatedly
pub fn migrate(conn: &mut Connection, direction: MigrationDirection) -> Result<(), StorageError> {
    let current = schema_version(conn)?;

    if current > CURRENT_SCHEMA_VERSION {
        return Err(StorageError::Migration(format!(
            "schema version {} is newer than supported {}",
            current, CURRENT_SCHEMA_VERSION
        )));
    }

    let tx = conn.transaction().map_err(query_error("migrate", ()))?;

    match direction {
        MigrationDirection::Up => {
            if current == CURRENT_SCHEMA_VERSION {
                return Ok(());
            }
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .map_err(query_error("migrate", "schema_version"))?;
            tx.execute_batch(SCHEMA_V1)
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            set_schema_version(&tx, CURRENT_SCHEMA_VERSION)?;
            info!(operation = "migrate", version = CURRENT_SCHEMA_VERSION, "Applied schema");
        }
        MigrationDirection::Down => {
            if current == 0 {
                return Ok(());
            }
            tx.execute_batch(DROP_V1)
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            tx.execute_batch("DROP TABLE IF EXISTS schema_version;")
                .map_err(|e| StorageError::Migration(e.to_string()))?;
            info!(operation = "migrate", version = current, "Reverted schema");
        }
    }

    tx.commit().map_err(query_error("migrate", ()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        migrate(&mut conn, MigrationDirection::Up).unwrap();
        migrate(&mut conn, MigrationDirection::Up).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

        migrate(&mut conn, MigrationDirection::Down).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }
}
