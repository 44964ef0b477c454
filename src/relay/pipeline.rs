//! Delivery pipeline: fans one inbound content unit out to its targets.
//!
//! Flow per unit:
//! 1. Ignore anything that is not video-like
//! 2. Look up enabled rules for the source
//! 3. Per rule: keyword filter, then dedup check
//! 4. Per target, in order: copy with one rate-limit retry, record on success
//!
//! Failed targets do not roll back earlier ones.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::RelaySettings;
use crate::error::TransportError;
use crate::media::ContentUnit;
use crate::relay::notify::Notifier;
use crate::relay::retry::{RetryBudget, with_rate_limit_retry};
use crate::rules::filter::{self, FilterVerdict};
use crate::rules::{ForwardingRule, RuleIndex};
use crate::store::DedupStore;
use crate::transport::{ChatId, MessageId, Transport};

/// What happened to one inbound unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Targets that received a copy, in delivery order.
    pub delivered: Vec<ChatId>,
    /// Targets whose copy failed terminally.
    pub failed: Vec<ChatId>,
    /// Rules rejected by their keyword lists.
    pub filtered_rules: usize,
    /// Rules suppressed because the fingerprint was delivered recently.
    pub duplicate_rules: usize,
}

impl DeliveryReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
            && self.failed.is_empty()
            && self.filtered_rules == 0
            && self.duplicate_rules == 0
    }
}

pub struct DeliveryPipeline {
    rules: Arc<RuleIndex>,
    dedup: Arc<dyn DedupStore>,
    transport: Arc<dyn Transport>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    settings: Arc<RwLock<RelaySettings>>,
}

impl DeliveryPipeline {
    pub fn new(
        rules: Arc<RuleIndex>,
        dedup: Arc<dyn DedupStore>,
        transport: Arc<dyn Transport>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        settings: Arc<RwLock<RelaySettings>>,
    ) -> Self {
        Self {
            rules,
            dedup,
            transport,
            notifier,
            clock,
            settings,
        }
    }

    /// Deliver one inbound unit to every matching target.
    pub async fn deliver(&self, unit: &ContentUnit) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if !unit.is_relay_eligible() {
            debug!(
                source = unit.source_id,
                message_id = unit.message_id,
                kind = %unit.kind,
                "Ignoring non-video message"
            );
            return report;
        }

        let rules = self.rules.rules_for(unit.source_id).await;
        if rules.is_empty() {
            return report;
        }

        let dedup = self.settings.read().await.dedup.clone();

        for rule in &rules {
            let verdict = filter::evaluate(rule, unit.caption_text());
            if let FilterVerdict::Blacklisted { keyword } = &verdict {
                info!(source = rule.source_id, keyword = %keyword, "Skipped by blacklist");
            }
            if !verdict.passed() {
                report.filtered_rules += 1;
                continue;
            }

            if dedup.enabled
                && let Some(fingerprint) = unit.fingerprint.as_deref()
                && self.seen_recently(fingerprint, dedup.window()).await
            {
                info!(
                    source = rule.source_id,
                    fingerprint,
                    "Duplicate within window, skipping rule"
                );
                report.duplicate_rules += 1;
                continue;
            }

            self.deliver_to_targets(rule, unit, &mut report).await;
        }

        if !report.delivered.is_empty() || !report.failed.is_empty() {
            info!(
                source = unit.source_id,
                message_id = unit.message_id,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Delivery finished"
            );
        }
        report
    }

    async fn seen_recently(&self, fingerprint: &str, window: chrono::Duration) -> bool {
        match self
            .dedup
            .is_duplicate(fingerprint, window, self.clock.now())
            .await
        {
            Ok(seen) => seen,
            Err(e) => {
                warn!(fingerprint, error = %e, "Dedup lookup failed, treating as new");
                false
            }
        }
    }

    async fn deliver_to_targets(
        &self,
        rule: &ForwardingRule,
        unit: &ContentUnit,
        report: &mut DeliveryReport,
    ) {
        for &target in &rule.target_ids {
            match self.copy_with_retry(target, unit).await {
                Ok(new_id) => {
                    debug!(
                        source = unit.source_id,
                        target,
                        message_id = unit.message_id,
                        new_message_id = new_id,
                        "Copied"
                    );
                    self.record(unit, target).await;
                    report.delivered.push(target);
                }
                Err(e) => {
                    error!(
                        source = unit.source_id,
                        target,
                        message_id = unit.message_id,
                        error = %e,
                        "Delivery to target failed"
                    );
                    report.failed.push(target);
                    self.notifier
                        .error(&format!(
                            "❌ Failed to deliver message {} from {} to {}: {}",
                            unit.message_id,
                            rule.source_label(),
                            rule.target_label(target),
                            e
                        ))
                        .await;
                }
            }
        }
    }

    async fn copy_with_retry(
        &self,
        target: ChatId,
        unit: &ContentUnit,
    ) -> Result<MessageId, TransportError> {
        let transport = &self.transport;
        with_rate_limit_retry("copy_message", target, RetryBudget::Limited(1), move || {
            transport.copy_message(
                target,
                unit.source_id,
                unit.message_id,
                unit.caption.as_deref(),
                unit.caption_entities.as_ref(),
            )
        })
        .await
    }

    /// Record a successful delivery. Failures are logged and swallowed.
    async fn record(&self, unit: &ContentUnit, target: ChatId) {
        let Some(fingerprint) = unit.fingerprint.as_deref() else {
            return;
        };
        if let Err(e) = self
            .dedup
            .record_delivery(fingerprint, unit.source_id, target, self.clock.now())
            .await
        {
            warn!(fingerprint, target, error = %e, "Failed to record delivery");
        }
    }
}
