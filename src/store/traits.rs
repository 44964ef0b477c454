//! `DedupStore` trait: async interface for delivery bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::DatabaseError;
use crate::transport::ChatId;

/// Delivery counters for the `/stats` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Live records in the store (bounded by the retention sweep).
    pub total_delivered: u64,
    /// Records written since the start of the current UTC day.
    pub delivered_today: u64,
}

/// A persisted delivery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub fingerprint: String,
    pub source_id: ChatId,
    pub target_id: ChatId,
    pub forwarded_at: DateTime<Utc>,
}

/// Durable record of which fingerprints were delivered recently.
///
/// The fingerprint alone is the key: a newer delivery of the same media
/// overwrites the older record regardless of target.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// True iff a record for `fingerprint` has `forwarded_at > now - window`.
    async fn is_duplicate(
        &self,
        fingerprint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Upsert the record for `fingerprint`.
    async fn record_delivery(
        &self,
        fingerprint: &str,
        source_id: ChatId,
        target_id: ChatId,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Look up the record for a fingerprint.
    async fn get_record(&self, fingerprint: &str) -> Result<Option<DeliveryRecord>, DatabaseError>;

    /// Delete records with `forwarded_at < cutoff`. Returns the number deleted.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, DatabaseError>;

    /// Total records, and records written at or after `since`.
    async fn stats(&self, since: DateTime<Utc>) -> Result<DeliveryStats, DatabaseError>;
}
