//! Error types for the media relay.

use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Rule store error: {0}")]
    RuleStore(#[from] RuleStoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Rule store persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("Failed to read rule store {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to write rule store {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Malformed rule store {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Signals surfaced by the chat-platform transport.
///
/// The engine drives its retry and counting logic by matching on these
/// variants: `RateLimited` is transient, `NotFound` is expected during
/// migration, and `Failed` is permanent for the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Referenced message not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Failed(String),
}

/// Migration start rejections. Raised before any state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error("A migration is already running")]
    AlreadyRunning,

    #[error("Message ids must be between 1 and 2147483647 (got {start_id}..{end_id})")]
    InvalidRange { start_id: i64, end_id: i64 },
}

/// Operator command parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Usage: {usage}")]
    Usage { usage: &'static str },

    #[error("IDs must be integers: {0}")]
    InvalidId(String),

    #[error("Unknown command: {0}")]
    Unknown(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
