//! Keyword filtering of captions, evaluated per rule.
//!
//! Blacklist first (any hit rejects), then whitelist (when non-empty, at
//! least one hit is required). Matching is case-insensitive substring.

use tracing::debug;

use crate::rules::model::ForwardingRule;

/// Outcome of running a caption through one rule's keyword lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Pass,
    /// Caption contains a blacklisted keyword.
    Blacklisted { keyword: String },
    /// A whitelist is configured and the caption matches none of it.
    NotWhitelisted,
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, FilterVerdict::Pass)
    }
}

/// Evaluate a caption against a rule's blacklist and whitelist.
pub fn evaluate(rule: &ForwardingRule, caption: &str) -> FilterVerdict {
    let caption = caption.to_lowercase();

    if let Some(keyword) = rule
        .keywords_blacklist
        .iter()
        .find(|k| caption.contains(&k.to_lowercase()))
    {
        debug!(source = rule.source_id, keyword = %keyword, "Caption matched blacklist");
        return FilterVerdict::Blacklisted {
            keyword: keyword.clone(),
        };
    }

    if !rule.keywords_whitelist.is_empty()
        && !rule
            .keywords_whitelist
            .iter()
            .any(|k| caption.contains(&k.to_lowercase()))
    {
        debug!(source = rule.source_id, "Caption matched no whitelist keyword");
        return FilterVerdict::NotWhitelisted;
    }

    FilterVerdict::Pass
}
