//! Forwarding rule data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transport::ChatId;

/// A source-to-targets mapping with optional keyword filters.
///
/// Field names on disk follow the long-standing config layout
/// (`source_chat_id`, `target_chat_ids`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    #[serde(rename = "source_chat_id")]
    pub source_id: ChatId,
    #[serde(
        rename = "source_chat_title",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_title: Option<String>,
    /// Destinations in insertion order, without repeats.
    #[serde(rename = "target_chat_ids", default)]
    pub target_ids: Vec<ChatId>,
    #[serde(
        rename = "target_chat_titles",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub target_titles: BTreeMap<ChatId, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_blacklist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_whitelist: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ForwardingRule {
    /// A new enabled rule with a single target and no filters.
    pub fn new(source_id: ChatId, target_id: ChatId) -> Self {
        Self {
            source_id,
            source_title: None,
            target_ids: vec![target_id],
            target_titles: BTreeMap::new(),
            keywords_blacklist: Vec::new(),
            keywords_whitelist: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_blacklist<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords_blacklist = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_whitelist<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords_whitelist = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Append a target unless it is already present. Returns whether it was added.
    pub fn add_target(&mut self, target_id: ChatId) -> bool {
        if self.target_ids.contains(&target_id) {
            return false;
        }
        self.target_ids.push(target_id);
        true
    }

    /// Drop a target and its title. Returns whether it was present.
    pub fn remove_target(&mut self, target_id: ChatId) -> bool {
        let before = self.target_ids.len();
        self.target_ids.retain(|t| *t != target_id);
        self.target_titles.remove(&target_id);
        self.target_ids.len() != before
    }

    /// Display name for the source: title when known, else the id.
    pub fn source_label(&self) -> String {
        match &self.source_title {
            Some(title) => format!("{title} ({})", self.source_id),
            None => self.source_id.to_string(),
        }
    }

    /// Display name for one target.
    pub fn target_label(&self, target_id: ChatId) -> String {
        match self.target_titles.get(&target_id) {
            Some(title) => format!("{title} ({target_id})"),
            None => target_id.to_string(),
        }
    }
}

/// The persisted rule collection, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<ForwardingRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ForwardingRule>) -> Self {
        Self { rules }
    }

    pub fn find(&self, source_id: ChatId) -> Option<&ForwardingRule> {
        self.rules.iter().find(|r| r.source_id == source_id)
    }

    pub fn find_mut(&mut self, source_id: ChatId) -> Option<&mut ForwardingRule> {
        self.rules.iter_mut().find(|r| r.source_id == source_id)
    }

    /// Enabled rules for a source, in file order.
    pub fn enabled_for(&self, source_id: ChatId) -> Vec<ForwardingRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.source_id == source_id)
            .cloned()
            .collect()
    }

    /// Remove the rule for a source. Returns whether one was removed.
    pub fn remove(&mut self, source_id: ChatId) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.source_id != source_id);
        self.rules.len() != before
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
