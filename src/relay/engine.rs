//! Relay engine: the facade the bot runtime and operator console call into.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::RelaySettings;
use crate::error::{DatabaseError, MigrationError, RuleStoreError};
use crate::media::ContentUnit;
use crate::relay::migration::{MigrationRequest, MigrationRun, Migrator};
use crate::relay::notify::Notifier;
use crate::relay::pipeline::{DeliveryPipeline, DeliveryReport};
use crate::rules::{ForwardingRule, RuleIndex};
use crate::store::{DedupStore, DeliveryStats};
use crate::transport::{ChatId, Transport};

/// Collaborators the engine is built from.
pub struct RelayDeps {
    pub transport: Arc<dyn Transport>,
    pub dedup: Arc<dyn DedupStore>,
    pub rules: Arc<RuleIndex>,
    pub clock: Arc<dyn Clock>,
}

pub struct RelayEngine {
    deps: RelayDeps,
    settings: Arc<RwLock<RelaySettings>>,
    pipeline: DeliveryPipeline,
    migrator: Migrator,
    notifier: Notifier,
}

impl RelayEngine {
    pub fn new(deps: RelayDeps, settings: RelaySettings) -> Self {
        let settings = Arc::new(RwLock::new(settings));
        let notifier = Notifier::new(deps.transport.clone(), settings.clone());
        let pipeline = DeliveryPipeline::new(
            deps.rules.clone(),
            deps.dedup.clone(),
            deps.transport.clone(),
            notifier.clone(),
            deps.clock.clone(),
            settings.clone(),
        );
        let migrator = Migrator::new(
            deps.transport.clone(),
            deps.dedup.clone(),
            deps.clock.clone(),
            settings.clone(),
        );
        Self {
            deps,
            settings,
            pipeline,
            migrator,
            notifier,
        }
    }

    /// Current settings snapshot.
    pub async fn settings(&self) -> RelaySettings {
        self.settings.read().await.clone()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Relay one inbound content unit.
    pub async fn handle_incoming(&self, unit: &ContentUnit) -> DeliveryReport {
        self.pipeline.deliver(unit).await
    }

    /// Add `target_id` to the rule for `source_id`, resolving chat titles
    /// on the way. Unresolvable chats are stored without a title.
    pub async fn add_rule(
        &self,
        source_id: ChatId,
        target_id: ChatId,
    ) -> Result<ForwardingRule, RuleStoreError> {
        let source_title = self.chat_title(source_id).await;
        let target_title = self.chat_title(target_id).await;
        self.deps
            .rules
            .add_or_update(source_id, target_id, source_title, target_title)
            .await
    }

    pub async fn remove_rule(&self, source_id: ChatId) -> Result<bool, RuleStoreError> {
        self.deps.rules.remove(source_id).await
    }

    pub async fn remove_target(
        &self,
        source_id: ChatId,
        target_id: ChatId,
    ) -> Result<bool, RuleStoreError> {
        self.deps.rules.remove_target(source_id, target_id).await
    }

    pub async fn list_rules(&self) -> Vec<ForwardingRule> {
        self.deps.rules.all().await
    }

    /// Total deliveries on record and those since UTC midnight.
    pub async fn stats(&self) -> Result<DeliveryStats, DatabaseError> {
        self.deps.dedup.stats(self.deps.clock.today_start()).await
    }

    pub fn start_migration(
        &self,
        request: MigrationRequest,
    ) -> Result<MigrationRun, MigrationError> {
        self.migrator.start(request)
    }

    pub fn request_stop(&self) -> bool {
        self.migrator.request_stop()
    }

    pub fn is_migrating(&self) -> bool {
        self.migrator.is_running()
    }

    /// Re-read rules from disk, replacing the runtime settings when given.
    /// Returns the number of rules loaded.
    pub async fn reload(&self, settings: Option<RelaySettings>) -> Result<usize, RuleStoreError> {
        if let Some(settings) = settings {
            *self.settings.write().await = settings;
            info!("Runtime settings replaced");
        }
        let count = self.deps.rules.reload().await?;
        info!(rules = count, "Forwarding rules reloaded");
        Ok(count)
    }

    /// Delete delivery records older than the retention period.
    pub async fn purge_expired(&self) -> Result<usize, DatabaseError> {
        let retention_days = self.settings.read().await.dedup.retention_days;
        let cutoff = self.deps.clock.now() - chrono::Duration::days(i64::from(retention_days));
        self.deps.dedup.purge_older_than(cutoff).await
    }

    async fn chat_title(&self, chat: ChatId) -> Option<String> {
        match self.deps.transport.resolve_chat(chat).await {
            Ok(info) => info.title,
            Err(e) => {
                warn!(chat, error = %e, "Could not resolve chat title");
                None
            }
        }
    }
}

/// Spawn a background task that purges expired delivery records once a day.
pub fn spawn_retention_task(engine: Arc<RelayEngine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(24 * 60 * 60));
        // The first tick completes immediately; startup already purged.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = engine.purge_expired().await {
                warn!(error = %e, "Retention sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use crate::clock::ManualClock;
    use crate::relay::testing::ScriptedTransport;
    use crate::rules::{JsonRuleStore, RuleStore};
    use crate::store::LibSqlBackend;

    struct Harness {
        engine: RelayEngine,
        transport: Arc<ScriptedTransport>,
        dedup: Arc<LibSqlBackend>,
        clock: Arc<ManualClock>,
        store: Arc<JsonRuleStore>,
        _tmp: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonRuleStore::new(tmp.path().join("config.json")));
        let rules = Arc::new(RuleIndex::load(store.clone()).await.unwrap());
        let transport = Arc::new(ScriptedTransport::new().with_title(100, "Source"));
        let dedup = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap(),
        ));
        let engine = RelayEngine::new(
            RelayDeps {
                transport: transport.clone(),
                dedup: dedup.clone(),
                rules,
                clock: clock.clone(),
            },
            RelaySettings {
                admin_chat_id: 1,
                ..Default::default()
            },
        );
        Harness {
            engine,
            transport,
            dedup,
            clock,
            store,
            _tmp: tmp,
        }
    }

    fn video(message_id: i64, fingerprint: &str) -> ContentUnit {
        ContentUnit::from_message(&json!({
            "message_id": message_id,
            "chat": {"id": 100},
            "video": {"file_id": "f", "file_unique_id": fingerprint}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn add_rule_resolves_titles_with_fallback() {
        let h = harness().await;
        let rule = h.engine.add_rule(100, 200).await.unwrap();

        assert_eq!(rule.source_title.as_deref(), Some("Source"));
        assert!(rule.target_titles.get(&200).is_none());
        assert_eq!(rule.target_label(200), "200");
        assert_eq!(h.engine.list_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn add_then_relay_then_stats() {
        let h = harness().await;
        h.engine.add_rule(100, 200).await.unwrap();

        let report = h.engine.handle_incoming(&video(1, "F")).await;
        assert_eq!(report.delivered, vec![200]);

        let stats = h.engine.stats().await.unwrap();
        assert_eq!(stats.total_delivered, 1);
        assert_eq!(stats.delivered_today, 1);

        h.clock.advance(Duration::days(1));
        let stats = h.engine.stats().await.unwrap();
        assert_eq!(stats.delivered_today, 0);
    }

    #[tokio::test]
    async fn remove_rule_and_target() {
        let h = harness().await;
        h.engine.add_rule(100, 200).await.unwrap();
        h.engine.add_rule(100, 300).await.unwrap();

        assert!(h.engine.remove_target(100, 200).await.unwrap());
        assert_eq!(h.engine.list_rules().await[0].target_ids, vec![300]);
        assert!(h.engine.remove_rule(100).await.unwrap());
        assert!(!h.engine.remove_rule(100).await.unwrap());
        assert!(h.transport.copies().is_empty());
    }

    #[tokio::test]
    async fn reload_swaps_settings_and_rules() {
        let h = harness().await;
        h.store
            .save(&crate::rules::RuleSet::new(vec![ForwardingRule::new(100, 200)]))
            .await
            .unwrap();

        let mut settings = h.engine.settings().await;
        settings.dedup.enabled = false;
        assert_eq!(h.engine.reload(Some(settings)).await.unwrap(), 1);
        assert!(!h.engine.settings().await.dedup.enabled);

        h.engine.handle_incoming(&video(1, "F")).await;
        h.engine.handle_incoming(&video(2, "F")).await;
        assert_eq!(h.transport.copies(), vec![200, 200]);
    }

    #[tokio::test]
    async fn purge_expired_uses_retention() {
        let h = harness().await;
        let now = h.clock.now();
        h.dedup
            .record_delivery("old", 100, 200, now - Duration::days(31))
            .await
            .unwrap();
        h.dedup
            .record_delivery("fresh", 100, 200, now - Duration::days(2))
            .await
            .unwrap();

        assert_eq!(h.engine.purge_expired().await.unwrap(), 1);
        assert!(h.dedup.get_record("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn migration_lifecycle_through_engine() {
        let h = harness().await;
        assert!(!h.engine.request_stop());

        let run = h
            .engine
            .start_migration(MigrationRequest {
                source_id: 100,
                target_id: 200,
                start_id: 1,
                end_id: 1,
            })
            .unwrap();
        assert!(h.engine.is_migrating());
        assert!(h.engine.request_stop());

        let report = run.run().await;
        assert_eq!(report.status, crate::relay::MigrationStatus::Cancelled);
        assert!(!h.engine.is_migrating());
    }
}
