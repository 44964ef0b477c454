//! Telegram transport: Bot API over HTTPS.
//!
//! Native Rust Bot API client covering the calls the relay makes
//! (copy, forward, delete, send, edit, getChat) plus the long-poll update
//! stream the bot runtime consumes.

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::error::TransportError;
use crate::media::ContentUnit;
use crate::transport::{ChatId, ChatInfo, MessageId, Transport, TransportResult};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Wait applied when a 429 carries no usable retry hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bad Request descriptions that mean the referenced message is gone.
const NOT_FOUND_MARKERS: &[&str] = &[
    "message to copy not found",
    "message to forward not found",
    "message to delete not found",
    "message to edit not found",
    "message_id_invalid",
    "message not found",
];

/// Update kinds the relay subscribes to.
const ALLOWED_UPDATES: &[&str] = &["message", "channel_post"];

/// Bot API client.
pub struct TelegramTransport {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a different Bot API server (self-hosted or test).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// POST a Bot API method and return its `result` field.
    async fn call(&self, method: &str, body: &Value) -> TransportResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Failed(format!("{method}: {}", e.without_url())))?;

        let status = resp.status().as_u16();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Failed(format!("{method}: unreadable response: {e}")))?;

        if data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let err = classify_api_error(status, &data);
        tracing::debug!(method, status, error = %err, "Telegram API call failed");
        Err(err)
    }

    /// Check the token against `getMe`.
    pub async fn health_check(&self) -> TransportResult<String> {
        let me = self.call("getMe", &json!({})).await?;
        Ok(me
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// Fetch one batch of updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> TransportResult<Vec<Value>> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });
        let result = self.call("getUpdates", &body).await?;
        Ok(result.as_array().cloned().unwrap_or_default())
    }

    /// Offset just past the newest queued update, so stale updates are dropped.
    pub async fn skip_pending(&self) -> TransportResult<i64> {
        let latest = self.get_updates(-1, 0).await?;
        Ok(latest
            .last()
            .and_then(|u| u.get("update_id"))
            .and_then(Value::as_i64)
            .map(|id| id + 1)
            .unwrap_or(0))
    }

    /// Long-poll updates forever, yielding raw update objects.
    ///
    /// Poll errors are logged and retried after a short pause; rate limits
    /// honor the server's hint.
    pub fn updates(self: std::sync::Arc<Self>, start_offset: i64) -> impl Stream<Item = Value> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut offset = start_offset;
            tracing::info!("Telegram transport listening for updates...");

            loop {
                let batch = match self.get_updates(offset, POLL_TIMEOUT_SECS).await {
                    Ok(batch) => batch,
                    Err(TransportError::RateLimited { retry_after }) => {
                        tracing::warn!(?retry_after, "Telegram poll rate limited");
                        tokio::time::sleep(retry_after).await;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for update in batch {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }
                    if tx.send(update).is_err() {
                        tracing::info!("Telegram update consumer closed");
                        return;
                    }
                }
            }
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        })
    }

    async fn send_message_chunk(&self, chat: ChatId, text: &str) -> TransportResult<MessageId> {
        let result = self
            .call("sendMessage", &json!({"chat_id": chat, "text": text}))
            .await?;
        message_id_of(&result, "sendMessage")
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn copy_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
        caption: Option<&str>,
        caption_entities: Option<&Value>,
    ) -> TransportResult<MessageId> {
        let mut body = json!({
            "chat_id": target,
            "from_chat_id": source,
            "message_id": message_id,
        });
        if let Some(cap) = caption {
            body["caption"] = Value::String(cap.to_string());
            if let Some(entities) = caption_entities {
                body["caption_entities"] = entities.clone();
            }
        }

        let result = self.call("copyMessage", &body).await?;
        message_id_of(&result, "copyMessage")
    }

    async fn forward_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    ) -> TransportResult<ContentUnit> {
        let body = json!({
            "chat_id": target,
            "from_chat_id": source,
            "message_id": message_id,
            "disable_notification": true,
        });
        let result = self.call("forwardMessage", &body).await?;
        ContentUnit::from_message(&result).ok_or_else(|| {
            TransportError::Failed("forwardMessage: result is not a message".into())
        })
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> TransportResult<()> {
        self.call(
            "deleteMessage",
            &json!({"chat_id": chat, "message_id": message_id}),
        )
        .await?;
        Ok(())
    }

    /// Splits text over Telegram's 4096 char limit; returns the last chunk's id.
    async fn send_message(&self, chat: ChatId, text: &str) -> TransportResult<MessageId> {
        let mut last_id = 0;
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            last_id = self.send_message_chunk(chat, &chunk).await?;
        }
        Ok(last_id)
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        self.call(
            "editMessageText",
            &json!({"chat_id": chat, "message_id": message_id, "text": text}),
        )
        .await?;
        Ok(())
    }

    async fn resolve_chat(&self, chat: ChatId) -> TransportResult<ChatInfo> {
        let result = self.call("getChat", &json!({"chat_id": chat})).await?;
        let title = result
            .get("title")
            .or_else(|| result.get("username"))
            .or_else(|| result.get("first_name"))
            .and_then(Value::as_str)
            .map(String::from);
        Ok(ChatInfo { id: chat, title })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map a failed Bot API response onto the transport's signal variants.
pub fn classify_api_error(status: u16, body: &Value) -> TransportError {
    let code = body
        .get("error_code")
        .and_then(Value::as_u64)
        .map(|c| c as u16)
        .unwrap_or(status);
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("no description")
        .to_string();

    if code == 429 {
        let retry_after = body
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(Value::as_u64)
            .or_else(|| parse_retry_after(&description))
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return TransportError::RateLimited { retry_after };
    }

    if code == 400 {
        let lower = description.to_lowercase();
        if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
            return TransportError::NotFound(description);
        }
    }

    TransportError::Failed(format!("{code}: {description}"))
}

/// Extract N from "... retry after N".
fn parse_retry_after(description: &str) -> Option<u64> {
    let lower = description.to_lowercase();
    let rest = &lower[lower.find("retry after")? + "retry after".len()..];
    rest.split_whitespace().next()?.parse().ok()
}

fn message_id_of(result: &Value, method: &str) -> TransportResult<MessageId> {
    result
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::Failed(format!("{method}: response missing message_id")))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
