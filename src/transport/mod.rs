//! Chat-platform transport capability.
//!
//! The engine only talks to the platform through [`Transport`]. Every call
//! returns an explicit [`TransportError`] variant on failure so retry and
//! counting decisions are made by matching, never by inspecting messages.

pub mod telegram;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::media::ContentUnit;

pub use telegram::TelegramTransport;

/// Platform chat identifier (users, groups, channels).
pub type ChatId = i64;

/// Platform message identifier, unique within a chat.
pub type MessageId = i64;

/// Result alias for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Chat metadata used for rule titles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: ChatId,
    pub title: Option<String>,
}

/// Outbound operations the relay needs from the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Copy a message without a forward marker. `None` caption keeps the
    /// original caption; entities are passed through verbatim.
    async fn copy_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
        caption: Option<&str>,
        caption_entities: Option<&Value>,
    ) -> TransportResult<MessageId>;

    /// Forward a message and return the forwarded copy, classified.
    async fn forward_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    ) -> TransportResult<ContentUnit>;

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> TransportResult<()>;

    /// Send plain text, returning the new message id.
    async fn send_message(&self, chat: ChatId, text: &str) -> TransportResult<MessageId>;

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()>;

    async fn resolve_chat(&self, chat: ChatId) -> TransportResult<ChatInfo>;
}
