//! Migration: operator-started, cancelable backfill over a message-id range.
//!
//! Each step probes a historical message by forwarding it into the staging
//! chat and deleting the staged copy, then copies it to the target if it is
//! video-like and not a recent duplicate. At most one run exists per
//! [`Migrator`]; the slot is released by [`SlotGuard`] on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RelaySettings;
use crate::error::{MigrationError, TransportError};
use crate::media::ContentUnit;
use crate::relay::retry::{RetryBudget, with_rate_limit_retry};
use crate::store::DedupStore;
use crate::transport::{ChatId, MessageId, Transport, TransportResult};

/// Bot API message ids are 32-bit.
const MAX_MESSAGE_ID: MessageId = i32::MAX as MessageId;

/// Operator request to backfill `[start_id, end_id]` from source to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRequest {
    pub source_id: ChatId,
    pub target_id: ChatId,
    pub start_id: MessageId,
    pub end_id: MessageId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationCounts {
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub missing: u64,
}

impl MigrationCounts {
    pub fn processed(&self) -> u64 {
        self.success + self.skipped + self.failed + self.missing
    }

    fn apply(&mut self, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Copied => self.success += 1,
            StepOutcome::Skipped => self.skipped += 1,
            StepOutcome::Failed => self.failed += 1,
            StepOutcome::Missing => self.missing += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Completed,
    Cancelled,
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub status: MigrationStatus,
    pub request: MigrationRequest,
    pub counts: MigrationCounts,
    /// Next message id that would have been processed.
    pub cursor: MessageId,
}

impl MigrationReport {
    pub fn summary(&self) -> String {
        let headline = match self.status {
            MigrationStatus::Completed => "✅ Migration completed",
            MigrationStatus::Cancelled => "⏹ Migration stopped",
        };
        format!(
            "{headline}\n{}",
            progress_lines(&self.request, self.cursor, &self.counts)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Copied,
    Skipped,
    Failed,
    Missing,
}

/// Holds the single-flight slot. Dropping it frees the slot.
struct SlotGuard {
    running: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        debug!("Migration slot released");
    }
}

/// Owner of the single-flight slot and the cancel flag.
pub struct Migrator {
    transport: Arc<dyn Transport>,
    dedup: Arc<dyn DedupStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<RwLock<RelaySettings>>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Migrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        dedup: Arc<dyn DedupStore>,
        clock: Arc<dyn Clock>,
        settings: Arc<RwLock<RelaySettings>>,
    ) -> Self {
        Self {
            transport,
            dedup,
            clock,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the slot and prepare a run. Nothing is sent until the run is
    /// driven with [`MigrationRun::run`].
    pub fn start(&self, request: MigrationRequest) -> Result<MigrationRun, MigrationError> {
        if request.start_id <= 0
            || request.end_id <= 0
            || request.start_id > MAX_MESSAGE_ID
            || request.end_id > MAX_MESSAGE_ID
        {
            return Err(MigrationError::InvalidRange {
                start_id: request.start_id,
                end_id: request.end_id,
            });
        }
        let request = if request.start_id > request.end_id {
            MigrationRequest {
                start_id: request.end_id,
                end_id: request.start_id,
                ..request
            }
        } else {
            request
        };

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MigrationError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);

        info!(
            source = request.source_id,
            target = request.target_id,
            start_id = request.start_id,
            end_id = request.end_id,
            "Migration started"
        );

        Ok(MigrationRun {
            request,
            status_message: None,
            transport: self.transport.clone(),
            dedup: self.dedup.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
            _guard: SlotGuard {
                running: self.running.clone(),
            },
        })
    }

    /// Ask the running migration to stop at its next step.
    /// Returns `false` when nothing is running.
    pub fn request_stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        info!("Migration stop requested");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A claimed migration, ready to be driven to completion.
pub struct MigrationRun {
    request: MigrationRequest,
    status_message: Option<(ChatId, MessageId)>,
    transport: Arc<dyn Transport>,
    dedup: Arc<dyn DedupStore>,
    clock: Arc<dyn Clock>,
    settings: Arc<RwLock<RelaySettings>>,
    cancel: Arc<AtomicBool>,
    _guard: SlotGuard,
}

impl MigrationRun {
    /// The normalized request (ids swapped if they were reversed).
    pub fn request(&self) -> MigrationRequest {
        self.request
    }

    /// Reuse an existing operator message as the status board.
    pub fn with_status_message(mut self, chat: ChatId, message_id: MessageId) -> Self {
        self.status_message = Some((chat, message_id));
        self
    }

    /// Drive the run to completion or cancellation. Consumes the run so the
    /// slot is released when this returns.
    pub async fn run(self) -> MigrationReport {
        let settings = self.settings.read().await.clone();
        let staging = settings.staging_chat_id();
        let progress_every = u64::from(settings.migration.progress_every.max(1));
        let pacing = settings.migration.pacing();

        let mut board = StatusBoard {
            transport: self.transport.clone(),
            chat: self
                .status_message
                .map_or(settings.admin_chat_id, |(chat, _)| chat),
            message_id: self.status_message.map(|(_, id)| id),
        };
        let request = self.request;
        let mut counts = MigrationCounts::default();
        let mut cursor = request.start_id;
        let mut status = MigrationStatus::Completed;

        if board.message_id.is_none() {
            board
                .publish(&format!(
                    "🔄 Migration starting\n{}",
                    progress_lines(&request, cursor, &counts)
                ))
                .await;
        }

        while cursor <= request.end_id {
            if self.cancel.load(Ordering::SeqCst) {
                status = MigrationStatus::Cancelled;
                break;
            }

            let outcome = self.step(cursor, staging, &settings).await;
            debug!(cursor, outcome = ?outcome, "Migration step");
            counts.apply(outcome);
            cursor += 1;

            if counts.processed() % progress_every == 0 && cursor <= request.end_id {
                board
                    .publish(&format!(
                        "🔄 Migration in progress\n{}",
                        progress_lines(&request, cursor, &counts)
                    ))
                    .await;
                tokio::time::sleep(pacing).await;
            }
        }

        let report = MigrationReport {
            status,
            request,
            counts,
            cursor,
        };
        info!(
            status = ?report.status,
            success = counts.success,
            skipped = counts.skipped,
            failed = counts.failed,
            missing = counts.missing,
            "Migration finished"
        );
        board.publish(&report.summary()).await;
        report
    }

    async fn step(
        &self,
        cursor: MessageId,
        staging: ChatId,
        settings: &RelaySettings,
    ) -> StepOutcome {
        let source = self.request.source_id;
        let target = self.request.target_id;

        let unit = match with_rate_limit_retry("probe", source, RetryBudget::Unbounded, move || {
            self.probe(cursor, staging)
        })
        .await
        {
            Ok(unit) => unit,
            Err(TransportError::NotFound(_)) => return StepOutcome::Missing,
            Err(e) => {
                warn!(cursor, error = %e, "Probe failed");
                return StepOutcome::Failed;
            }
        };

        if !unit.is_relay_eligible() {
            return StepOutcome::Skipped;
        }

        if settings.dedup.enabled
            && let Some(fingerprint) = unit.fingerprint.as_deref()
        {
            match self
                .dedup
                .is_duplicate(fingerprint, settings.dedup.window(), self.clock.now())
                .await
            {
                Ok(true) => return StepOutcome::Skipped,
                Ok(false) => {}
                Err(e) => warn!(fingerprint, error = %e, "Dedup lookup failed, treating as new"),
            }
        }

        let transport = &self.transport;
        match with_rate_limit_retry("copy_message", target, RetryBudget::Unbounded, move || {
            transport.copy_message(target, source, cursor, None, None)
        })
        .await
        {
            Ok(_) => {
                if let Some(fingerprint) = unit.fingerprint.as_deref()
                    && let Err(e) = self
                        .dedup
                        .record_delivery(fingerprint, source, target, self.clock.now())
                        .await
                {
                    warn!(fingerprint, error = %e, "Failed to record delivery");
                }
                StepOutcome::Copied
            }
            Err(TransportError::NotFound(_)) => StepOutcome::Missing,
            Err(e) => {
                warn!(cursor, target, error = %e, "Migration copy failed");
                StepOutcome::Failed
            }
        }
    }

    /// Forward into the staging chat and always delete the staged copy
    /// before the result is interpreted.
    async fn probe(&self, cursor: MessageId, staging: ChatId) -> TransportResult<ContentUnit> {
        let forwarded = self
            .transport
            .forward_message(staging, self.request.source_id, cursor)
            .await;
        if let Ok(staged) = &forwarded
            && let Err(e) = self
                .transport
                .delete_message(staging, staged.message_id)
                .await
        {
            warn!(cursor, error = %e, "Failed to delete staged probe");
        }
        forwarded
    }
}

/// A single operator message edited in place as the run progresses.
struct StatusBoard {
    transport: Arc<dyn Transport>,
    chat: ChatId,
    message_id: Option<MessageId>,
}

impl StatusBoard {
    async fn publish(&mut self, text: &str) {
        if let Some(id) = self.message_id {
            match self.transport.edit_message_text(self.chat, id, text).await {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "Status edit failed, sending a new message"),
            }
        }
        match self.transport.send_message(self.chat, text).await {
            Ok(id) => self.message_id = Some(id),
            Err(e) => warn!(error = %e, "Failed to send migration status"),
        }
    }
}

fn progress_lines(
    request: &MigrationRequest,
    cursor: MessageId,
    counts: &MigrationCounts,
) -> String {
    format!(
        "From {} to {}, messages {}..{}\nCursor: {}\n\
         ✅ Copied: {}\n⏭ Skipped: {}\n❌ Failed: {}\n🔍 Missing: {}",
        request.source_id,
        request.target_id,
        request.start_id,
        request.end_id,
        cursor,
        counts.success,
        counts.skipped,
        counts.failed,
        counts.missing
    )
}
