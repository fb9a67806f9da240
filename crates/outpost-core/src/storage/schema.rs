//! SQLite layout for the durable key-value table
//!
//! Queue, failure list and entity snapshots are each stored as a single
//! JSON value under one key, so every logical write is one row upsert.
//! The layout version lives in SQLite's `user_version` pragma.

use rusqlite::{Connection, Result};

/// Layout version written by [`init_schema`]
pub const SCHEMA_VERSION: i32 = 1;

/// Create the `kv` table and stamp the layout version
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Layout version of an opened database, 0 for a fresh file
pub fn schema_version(conn: &Connection) -> Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Whether [`init_schema`] still has to run on this connection
pub fn needs_init(conn: &Connection) -> bool {
    schema_version(conn).map_or(true, |v| v < SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_needs_init() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        assert!(needs_init(&conn));

        init_schema(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(!needs_init(&conn));
    }

    #[test]
    fn test_reinit_keeps_entries() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES ('queue:pending', '[]', 0)",
            [],
        )
        .unwrap();

        init_schema(&conn).unwrap();

        let value: String = conn
            .query_row("SELECT value FROM kv WHERE key = 'queue:pending'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(value, "[]");
    }
}
