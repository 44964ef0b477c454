//! In-memory view over the persisted forwarding rules.
//!
//! Lookups hit the cached view. Every mutation re-reads the store first so
//! manual edits made since the last load are not clobbered, then saves and
//! refreshes the cache. There is no lock against out-of-process edits: an
//! edit landing between the reload and the save is overwritten.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::error::RuleStoreError;
use crate::rules::model::{ForwardingRule, RuleSet};
use crate::rules::store::RuleStore;
use crate::transport::ChatId;

pub struct RuleIndex {
    store: Arc<dyn RuleStore>,
    view: RwLock<RuleSet>,
}

impl RuleIndex {
    /// Build an index and load the initial view from the store.
    pub async fn load(store: Arc<dyn RuleStore>) -> Result<Self, RuleStoreError> {
        let rules = store.load().await?;
        info!(rules = rules.len(), "Forwarding rules loaded");
        Ok(Self {
            store,
            view: RwLock::new(rules),
        })
    }

    /// Enabled rules for a source, in persisted order.
    pub async fn rules_for(&self, source_id: ChatId) -> Vec<ForwardingRule> {
        self.view.read().await.enabled_for(source_id)
    }

    /// Every rule, enabled or not.
    pub async fn all(&self) -> Vec<ForwardingRule> {
        self.view.read().await.rules.clone()
    }

    /// Refresh the cached view from the store.
    pub async fn reload(&self) -> Result<usize, RuleStoreError> {
        let rules = self.store.load().await?;
        let count = rules.len();
        *self.view.write().await = rules;
        Ok(count)
    }

    /// Add `target_id` to the rule for `source_id`, creating the rule if needed.
    ///
    /// Idempotent for an existing target; titles are updated when supplied.
    /// Always persists.
    pub async fn add_or_update(
        &self,
        source_id: ChatId,
        target_id: ChatId,
        source_title: Option<String>,
        target_title: Option<String>,
    ) -> Result<ForwardingRule, RuleStoreError> {
        let mut rules = self.store.load().await?;

        let idx = match rules.rules.iter().position(|r| r.source_id == source_id) {
            Some(idx) => {
                rules.rules[idx].add_target(target_id);
                idx
            }
            None => {
                rules.rules.push(ForwardingRule::new(source_id, target_id));
                rules.rules.len() - 1
            }
        };
        let rule = &mut rules.rules[idx];
        if let Some(title) = source_title {
            rule.source_title = Some(title);
        }
        if let Some(title) = target_title {
            rule.target_titles.insert(target_id, title);
        }
        let updated = rule.clone();

        self.commit(rules).await?;
        info!(source = source_id, target = target_id, "Forwarding rule added");
        Ok(updated)
    }

    /// Remove the rule for `source_id`. Persists only when something changed.
    pub async fn remove(&self, source_id: ChatId) -> Result<bool, RuleStoreError> {
        let mut rules = self.store.load().await?;
        if !rules.remove(source_id) {
            *self.view.write().await = rules;
            return Ok(false);
        }
        self.commit(rules).await?;
        info!(source = source_id, "Forwarding rule removed");
        Ok(true)
    }

    /// Remove one target from a rule; the rule goes away with its last target.
    pub async fn remove_target(
        &self,
        source_id: ChatId,
        target_id: ChatId,
    ) -> Result<bool, RuleStoreError> {
        let mut rules = self.store.load().await?;
        let Some(rule) = rules.find_mut(source_id) else {
            return Ok(false);
        };
        if !rule.remove_target(target_id) {
            return Ok(false);
        }
        if rule.target_ids.is_empty() {
            rules.remove(source_id);
            info!(source = source_id, "Last target removed, rule dropped");
        }
        self.commit(rules).await?;
        info!(source = source_id, target = target_id, "Forwarding target removed");
        Ok(true)
    }

    async fn commit(&self, rules: RuleSet) -> Result<(), RuleStoreError> {
        self.store.save(&rules).await?;
        *self.view.write().await = rules;
        Ok(())
    }
}
