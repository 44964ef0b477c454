//! Content classification: the single step that decides whether a platform
//! message carries relay-eligible media.

use serde_json::Value;

use crate::transport::{ChatId, MessageId};

/// Kind of attachment carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A regular video.
    Video,
    /// A round video note.
    VideoNote,
    /// A document whose MIME type is `video/*`.
    VideoDocument,
    /// Anything else: text, photos, non-video documents, service messages.
    Other,
}

impl MediaKind {
    /// Whether messages of this kind are relayed at all.
    pub fn is_relay_eligible(self) -> bool {
        !matches!(self, MediaKind::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::VideoNote => "video_note",
            MediaKind::VideoDocument => "video_file",
            MediaKind::Other => "other",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform message reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub source_id: ChatId,
    pub message_id: MessageId,
    pub caption: Option<String>,
    /// Formatting entities, passed through verbatim on copy.
    pub caption_entities: Option<Value>,
    pub kind: MediaKind,
    /// Platform-stable media identifier (`file_unique_id`).
    pub fingerprint: Option<String>,
}

impl ContentUnit {
    /// Build a unit from a Bot API `Message` object.
    ///
    /// Returns `None` when the object lacks a chat id or message id.
    /// Non-media messages classify as [`MediaKind::Other`].
    pub fn from_message(message: &Value) -> Option<Self> {
        let source_id = message.get("chat")?.get("id")?.as_i64()?;
        let message_id = message.get("message_id")?.as_i64()?;
        let (kind, fingerprint) = classify(message);

        Some(Self {
            source_id,
            message_id,
            caption: message
                .get("caption")
                .and_then(Value::as_str)
                .map(String::from),
            caption_entities: message
                .get("caption_entities")
                .filter(|v| v.is_array())
                .cloned(),
            kind,
            fingerprint,
        })
    }

    pub fn is_relay_eligible(&self) -> bool {
        self.kind.is_relay_eligible()
    }

    /// Caption text, empty when absent.
    pub fn caption_text(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }
}

/// Classify a Bot API `Message` object and extract its fingerprint.
pub fn classify(message: &Value) -> (MediaKind, Option<String>) {
    if let Some(video) = message.get("video") {
        return (MediaKind::Video, file_unique_id(video));
    }
    if let Some(note) = message.get("video_note") {
        return (MediaKind::VideoNote, file_unique_id(note));
    }
    if let Some(document) = message.get("document") {
        let is_video = document
            .get("mime_type")
            .and_then(Value::as_str)
            .is_some_and(|mime| mime.starts_with("video/"));
        if is_video {
            return (MediaKind::VideoDocument, file_unique_id(document));
        }
    }
    (MediaKind::Other, None)
}

fn file_unique_id(attachment: &Value) -> Option<String> {
    attachment
        .get("file_unique_id")
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_video() {
        let msg = json!({
            "message_id": 10,
            "chat": {"id": -100123},
            "video": {"file_id": "f", "file_unique_id": "AgADvid"},
            "caption": "Hello",
            "caption_entities": [{"type": "bold", "offset": 0, "length": 5}]
        });
        let unit = ContentUnit::from_message(&msg).unwrap();
        assert_eq!(unit.kind, MediaKind::Video);
        assert_eq!(unit.fingerprint.as_deref(), Some("AgADvid"));
        assert_eq!(unit.source_id, -100123);
        assert_eq!(unit.message_id, 10);
        assert_eq!(unit.caption_text(), "Hello");
        assert!(unit.caption_entities.is_some());
    }

    #[test]
    fn classifies_video_note() {
        let msg = json!({
            "message_id": 1,
            "chat": {"id": 5},
            "video_note": {"file_unique_id": "note1"}
        });
        let unit = ContentUnit::from_message(&msg).unwrap();
        assert_eq!(unit.kind, MediaKind::VideoNote);
        assert_eq!(unit.fingerprint.as_deref(), Some("note1"));
        assert_eq!(unit.caption_text(), "");
    }

    #[test]
    fn classifies_video_document() {
        let msg = json!({
            "message_id": 1,
            "chat": {"id": 5},
            "document": {"file_unique_id": "doc1", "mime_type": "video/mp4"}
        });
        assert_eq!(classify(&msg), (MediaKind::VideoDocument, Some("doc1".into())));
    }

    #[test]
    fn non_video_document_is_other() {
        let msg = json!({
            "message_id": 1,
            "chat": {"id": 5},
            "document": {"file_unique_id": "doc1", "mime_type": "application/pdf"}
        });
        let unit = ContentUnit::from_message(&msg).unwrap();
        assert_eq!(unit.kind, MediaKind::Other);
        assert!(!unit.is_relay_eligible());
        assert_eq!(unit.fingerprint, None);
    }

    #[test]
    fn text_message_is_other() {
        let msg = json!({"message_id": 3, "chat": {"id": 5}, "text": "hi"});
        let unit = ContentUnit::from_message(&msg).unwrap();
        assert_eq!(unit.kind, MediaKind::Other);
    }

    #[test]
    fn missing_chat_is_none() {
        let msg = json!({"message_id": 3, "video": {"file_unique_id": "x"}});
        assert!(ContentUnit::from_message(&msg).is_none());
    }
}
