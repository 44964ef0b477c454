//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.
//! On first run against a legacy DB (a `forwarded_videos` table from the
//! previous bot, no `_migrations` table) the old rows are carried over.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "forwarded_media",
        sql: r#"
            CREATE TABLE IF NOT EXISTS forwarded_media (
                fingerprint TEXT PRIMARY KEY,
                source_chat_id INTEGER NOT NULL,
                target_chat_id INTEGER NOT NULL,
                forwarded_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX IF NOT EXISTS idx_forwarded_media_forwarded_at
                ON forwarded_media(forwarded_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if current_version == 0 && legacy_table_exists(conn).await? {
        import_legacy_rows(conn).await?;
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Check for the previous bot's `forwarded_videos` table.
async fn legacy_table_exists(conn: &Connection) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='forwarded_videos'",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to check legacy tables: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read legacy check: {e}")))?;

    match row {
        Some(row) => {
            let count: i64 = row.get(0).unwrap_or(0);
            Ok(count > 0)
        }
        None => Ok(false),
    }
}

/// Copy legacy rows into `forwarded_media`, normalizing timestamps to
/// RFC 3339 with millisecond precision. Sub-millisecond digits are
/// truncated, not rounded.
///
/// Legacy timestamps carry no zone and are read as UTC. The previous bot
/// wrote host-local time, so on a non-UTC host imported rows are shifted by
/// the host's UTC offset until they age out of the dedup window.
async fn import_legacy_rows(conn: &Connection) -> Result<(), DatabaseError> {
    let imported = conn
        .execute(
            "INSERT OR IGNORE INTO forwarded_media
                (fingerprint, source_chat_id, target_chat_id, forwarded_at)
             SELECT file_unique_id, source_chat_id, target_chat_id,
                    strftime('%Y-%m-%dT%H:%M:%fZ', substr(forwarded_at, 1, 23))
             FROM forwarded_videos
             WHERE strftime('%Y-%m-%dT%H:%M:%fZ', substr(forwarded_at, 1, 23)) IS NOT NULL",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to import legacy rows: {e}")))?;

    tracing::info!(imported, "Legacy forwarded_videos rows imported");
    Ok(())
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
