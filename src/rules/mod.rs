//! Forwarding rules: data model, persistence, lookup, and keyword filtering.

pub mod filter;
pub mod index;
pub mod model;
pub mod store;

pub use filter::FilterVerdict;
pub use index::RuleIndex;
pub use model::{ForwardingRule, RuleSet};
pub use store::{JsonRuleStore, RuleStore};
