//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use sifu_core::error::SifuError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), SifuError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| SifuError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SifuError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: knowledge_entries");
    }

    Ok(())
}

/// Version 1: knowledge entries.
///
/// Metadata and tags are stored as JSON text; timestamps as RFC 3339.
fn apply_v1(conn: &Connection) -> Result<(), SifuError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS knowledge_entries (
            id          TEXT PRIMARY KEY NOT NULL,
            content     TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            tags        TEXT NOT NULL DEFAULT '[]',
            language    TEXT NOT NULL DEFAULT 'en',
            confidence  REAL NOT NULL DEFAULT 1.0
                        CHECK (confidence >= 0.0 AND confidence <= 1.0),
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_knowledge_updated_at
            ON knowledge_entries (updated_at DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'knowledge_entries');
        ",
    )
    .map_err(|e| SifuError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_confidence_check_constraint() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO knowledge_entries (id, content, confidence, created_at, updated_at)
             VALUES ('x', 'y', 1.5, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
