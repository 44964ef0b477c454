//! Rule persistence: a JSON document with atomic replace on save.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RuleStoreError;
use crate::rules::model::{ForwardingRule, RuleSet};

/// Key holding the rule array inside the document.
const RULES_KEY: &str = "forwarding_rules";

/// Backend-agnostic rule persistence.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Read the current rule set. A missing store reads as empty.
    async fn load(&self) -> Result<RuleSet, RuleStoreError>;

    /// Replace the persisted rule set atomically.
    async fn save(&self, rules: &RuleSet) -> Result<(), RuleStoreError>;
}

/// Rules stored under `forwarding_rules` in a JSON document.
///
/// The document is usually the main config file, so every other key is
/// preserved on save. Saves write a uniquely named sibling temp file and
/// rename it over the target; a failed save leaves the original intact.
pub struct JsonRuleStore {
    path: PathBuf,
}

impl JsonRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    /// Read the whole document as a JSON object, or an empty one if absent.
    async fn read_document(&self) -> Result<Map<String, Value>, RuleStoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(RuleStoreError::Read {
                    path: self.display(),
                    reason: e.to_string(),
                });
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RuleStoreError::Malformed {
                path: self.display(),
                reason: "top level is not a JSON object".into(),
            }),
            Err(e) => Err(RuleStoreError::Malformed {
                path: self.display(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write_atomic(&self, payload: &[u8]) -> Result<(), RuleStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RuleStoreError::Write {
                    path: self.display(),
                    reason: format!("failed to create directory: {e}"),
                })?;
        }

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        let result = async {
            tokio::fs::write(&temp_path, payload).await?;
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %temp_path.display(), "Failed to remove temp rule file: {cleanup}");
            }
            return Err(RuleStoreError::Write {
                path: self.display(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RuleStore for JsonRuleStore {
    async fn load(&self) -> Result<RuleSet, RuleStoreError> {
        let document = self.read_document().await?;
        let Some(raw_rules) = document.get(RULES_KEY) else {
            debug!(path = %self.display(), "No forwarding_rules key, starting empty");
            return Ok(RuleSet::default());
        };

        let rules: Vec<ForwardingRule> =
            serde_json::from_value(raw_rules.clone()).map_err(|e| RuleStoreError::Malformed {
                path: self.display(),
                reason: format!("{RULES_KEY}: {e}"),
            })?;

        for rule in rules.iter().filter(|r| r.target_ids.is_empty()) {
            warn!(source = rule.source_id, "Rule has no targets and will never fire");
        }

        Ok(RuleSet::new(rules))
    }

    async fn save(&self, rules: &RuleSet) -> Result<(), RuleStoreError> {
        let mut document = self.read_document().await?;
        let encoded = serde_json::to_value(&rules.rules).map_err(|e| RuleStoreError::Write {
            path: self.display(),
            reason: format!("failed to encode rules: {e}"),
        })?;
        document.insert(RULES_KEY.to_string(), encoded);

        let payload = serde_json::to_vec_pretty(&Value::Object(document)).map_err(|e| {
            RuleStoreError::Write {
                path: self.display(),
                reason: format!("failed to encode document: {e}"),
            }
        })?;

        self.write_atomic(&payload).await?;
        info!(path = %self.display(), rules = rules.len(), "Forwarding rules saved");
        Ok(())
    }
}
