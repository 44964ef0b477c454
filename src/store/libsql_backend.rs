//! libSQL backend: async `DedupStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 UTC strings with millisecond precision so that
//! string comparison in SQL matches chronological order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{DedupStore, DeliveryRecord, DeliveryStats};
use crate::transport::ChatId;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn count_where(&self, sql: &str, since: Option<String>) -> Result<u64, DatabaseError> {
        let mut rows = match since {
            Some(since) => self.conn().query(sql, params![since]).await,
            None => self.conn().query(sql, ()).await,
        }
        .map_err(|e| DatabaseError::Query(format!("stats: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("stats: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: `2026-01-02T03:04:05.678Z`.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_record(row: &libsql::Row) -> Result<DeliveryRecord, libsql::Error> {
    let forwarded_at: String = row.get(3)?;
    Ok(DeliveryRecord {
        fingerprint: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        forwarded_at: parse_datetime(&forwarded_at),
    })
}

#[async_trait]
impl DedupStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn is_duplicate(
        &self,
        fingerprint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let cutoff = format_timestamp(now - window);
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM forwarded_media WHERE fingerprint = ?1 AND forwarded_at > ?2",
                params![fingerprint, cutoff],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_duplicate: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_duplicate: {e}"))),
        }
    }

    async fn record_delivery(
        &self,
        fingerprint: &str,
        source_id: ChatId,
        target_id: ChatId,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO forwarded_media
                    (fingerprint, source_chat_id, target_chat_id, forwarded_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    source_chat_id = excluded.source_chat_id,
                    target_chat_id = excluded.target_chat_id,
                    forwarded_at = excluded.forwarded_at",
                params![fingerprint, source_id, target_id, format_timestamp(at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_delivery: {e}")))?;

        debug!(fingerprint, source = source_id, target = target_id, "Delivery recorded");
        Ok(())
    }

    async fn get_record(&self, fingerprint: &str) -> Result<Option<DeliveryRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT fingerprint, source_chat_id, target_chat_id, forwarded_at
                 FROM forwarded_media WHERE fingerprint = ?1",
                params![fingerprint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_record row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM forwarded_media WHERE forwarded_at < ?1",
                params![format_timestamp(cutoff)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("purge_older_than: {e}")))?;

        if count > 0 {
            info!(count, cutoff = %cutoff, "Purged old delivery records");
        }
        Ok(count as usize)
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats, DatabaseError> {
        let total_delivered = self
            .count_where("SELECT COUNT(*) FROM forwarded_media", None)
            .await?;
        let delivered_today = self
            .count_where(
                "SELECT COUNT(*) FROM forwarded_media WHERE forwarded_at >= ?1",
                Some(format_timestamp(since)),
            )
            .await?;
        Ok(DeliveryStats {
            total_delivered,
            delivered_today,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn unknown_fingerprint_is_not_duplicate() {
        let db = test_db().await;
        assert!(!db.is_duplicate("F", Duration::hours(24), t0()).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_within_window_only() {
        let db = test_db().await;
        db.record_delivery("F", -100, -200, t0()).await.unwrap();

        let window = Duration::hours(24);
        assert!(db.is_duplicate("F", window, t0() + Duration::hours(1)).await.unwrap());
        assert!(!db.is_duplicate("F", window, t0() + Duration::hours(25)).await.unwrap());
        // Exactly at the edge the record is no longer inside the window.
        assert!(!db.is_duplicate("F", window, t0() + Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn record_overwrites_by_fingerprint() {
        let db = test_db().await;
        db.record_delivery("F", -100, -200, t0()).await.unwrap();
        let later = t0() + Duration::minutes(5);
        db.record_delivery("F", -100, -300, later).await.unwrap();

        let record = db.get_record("F").await.unwrap().unwrap();
        assert_eq!(record.target_id, -300);
        assert_eq!(record.forwarded_at, later);

        let stats = db.stats(t0()).await.unwrap();
        assert_eq!(stats.total_delivered, 1);
    }

    #[tokio::test]
    async fn get_record_missing() {
        let db = test_db().await;
        assert!(db.get_record("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_older_records() {
        let db = test_db().await;
        db.record_delivery("old", 1, 2, t0() - Duration::days(31)).await.unwrap();
        db.record_delivery("new", 1, 2, t0() - Duration::days(1)).await.unwrap();

        let purged = db.purge_older_than(t0() - Duration::days(30)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_record("old").await.unwrap().is_none());
        assert!(db.get_record("new").await.unwrap().is_some());

        assert_eq!(db.purge_older_than(t0() - Duration::days(30)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stats_counts_total_and_since() {
        let db = test_db().await;
        let midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        db.record_delivery("a", 1, 2, midnight - Duration::hours(2)).await.unwrap();
        db.record_delivery("b", 1, 2, midnight).await.unwrap();
        db.record_delivery("c", 1, 2, midnight + Duration::hours(3)).await.unwrap();

        let stats = db.stats(midnight).await.unwrap();
        assert_eq!(
            stats,
            DeliveryStats {
                total_delivered: 3,
                delivered_today: 2,
            }
        );
    }

    #[tokio::test]
    async fn new_local_creates_file_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("relay.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.record_delivery("F", 1, 2, t0()).await.unwrap();
        }
        assert!(path.exists());

        let reopened = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(reopened.get_record("F").await.unwrap().is_some());
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = format_timestamp(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(a, "2026-01-02T03:04:05.000Z");
        assert_eq!(parse_datetime(&a), Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
    }
}
