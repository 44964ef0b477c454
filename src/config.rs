//! Configuration types.
//!
//! Settings live in a JSON document (by default `config/config.json`). The
//! same document usually carries the `forwarding_rules` array, which is owned
//! by [`crate::rules::JsonRuleStore`] and ignored here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::transport::ChatId;

/// Placeholder shipped in the example config.
const TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Bot API token. `RELAY_BOT_TOKEN` overrides the file value.
    #[serde(default, deserialize_with = "deserialize_token")]
    pub bot_token: Option<SecretString>,
    /// The single operator allowed to issue commands and receive notifications.
    #[serde(default)]
    pub admin_user_id: ChatId,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub features: Features,
}

/// Feature toggles and tuning knobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub deduplication: DedupSettings,
    #[serde(default)]
    pub admin_notifications: NotificationSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
}

/// Duplicate suppression policy.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Window during which a repeated fingerprint is suppressed.
    #[serde(default = "default_expire_hours")]
    pub expire_hours: u32,
    /// Records older than this are purged by the retention sweep.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl DedupSettings {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.expire_hours))
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            expire_hours: default_expire_hours(),
            retention_days: default_retention_days(),
        }
    }
}

/// Operator notification policy.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub notify_on_start: bool,
    #[serde(default = "default_true")]
    pub notify_on_error: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_on_start: true,
            notify_on_error: true,
        }
    }
}

/// Migration pacing and probe staging.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    /// Chat the probe forwards into. Defaults to the admin chat.
    #[serde(default)]
    pub staging_chat_id: Option<ChatId>,
    /// Emit a progress report every N processed steps.
    #[serde(default = "default_progress_every")]
    pub progress_every: u32,
    /// Delay after each progress report.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl MigrationSettings {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            staging_chat_id: None,
            progress_every: default_progress_every(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

/// Runtime policy the engine reads on every operation. Swapped on `/reload`.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub admin_chat_id: ChatId,
    pub dedup: DedupSettings,
    pub notifications: NotificationSettings,
    pub migration: MigrationSettings,
}

impl RelaySettings {
    /// Where migration probes are staged.
    pub fn staging_chat_id(&self) -> ChatId {
        self.migration.staging_chat_id.unwrap_or(self.admin_chat_id)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            admin_chat_id: 0,
            dedup: DedupSettings::default(),
            notifications: NotificationSettings::default(),
            migration: MigrationSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate the config file, applying environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&raw)?;

        if let Ok(token) = std::env::var("RELAY_BOT_TOKEN")
            && !token.trim().is_empty()
        {
            config.bot_token = Some(SecretString::from(token));
        }

        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parse a config document without validating it.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self
            .bot_token
            .as_ref()
            .map(|t| t.expose_secret().trim().to_string())
            .unwrap_or_default();
        if token.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "bot_token".into(),
                hint: "Set it in the config file or via RELAY_BOT_TOKEN.".into(),
            });
        }
        if token == TOKEN_PLACEHOLDER {
            return Err(ConfigError::InvalidValue {
                key: "bot_token".into(),
                message: "replace the placeholder with a real bot token".into(),
            });
        }
        if self.admin_user_id == 0 {
            return Err(ConfigError::MissingRequired {
                key: "admin_user_id".into(),
                hint: "Numeric Telegram user id of the operator.".into(),
            });
        }
        if self.features.deduplication.expire_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "features.deduplication.expire_hours".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.features.migration.progress_every == 0 {
            return Err(ConfigError::InvalidValue {
                key: "features.migration.progress_every".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// The engine-facing slice of the configuration.
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            admin_chat_id: self.admin_user_id,
            dedup: self.features.deduplication.clone(),
            notifications: self.features.admin_notifications.clone(),
            migration: self.features.migration.clone(),
        }
    }

    /// Token for transport construction. Empty only if validation was skipped.
    pub fn token(&self) -> SecretString {
        self.bot_token
            .clone()
            .unwrap_or_else(|| SecretString::from(String::new()))
    }
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}

fn default_true() -> bool {
    true
}

fn default_expire_hours() -> u32 {
    24
}

fn default_retention_days() -> u32 {
    30
}

fn default_progress_every() -> u32 {
    20
}

fn default_pacing_ms() -> u64 {
    1000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/bot.db")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
