//! Scripted in-process transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::TransportError;
use crate::media::ContentUnit;
use crate::transport::{ChatId, ChatInfo, MessageId, Transport, TransportResult};

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Copy {
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
        caption: Option<String>,
    },
    Forward {
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    },
    Delete {
        chat: ChatId,
        message_id: MessageId,
    },
    Send {
        chat: ChatId,
        text: String,
    },
    Edit {
        chat: ChatId,
        message_id: MessageId,
        text: String,
    },
}

type ForwardHook = Box<dyn Fn(MessageId) + Send + Sync>;

/// Transport double. Copies succeed unless a per-target script says
/// otherwise; forwards return whatever was registered for the message id
/// and `NotFound` for everything else.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    copy_script: Mutex<HashMap<ChatId, VecDeque<TransportResult<MessageId>>>>,
    history: Mutex<HashMap<MessageId, TransportResult<Value>>>,
    titles: HashMap<ChatId, String>,
    fail_edits: bool,
    next_id: Mutex<MessageId>,
    on_forward: Mutex<Option<ForwardHook>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1000),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, chat: ChatId, title: &str) -> Self {
        self.titles.insert(chat, title.to_string());
        self
    }

    pub fn with_failing_edits(mut self) -> Self {
        self.fail_edits = true;
        self
    }

    /// Queue outcomes for the next copies into `target`.
    pub fn script_copy(&self, target: ChatId, outcomes: Vec<TransportResult<MessageId>>) {
        self.copy_script
            .lock()
            .unwrap()
            .entry(target)
            .or_default()
            .extend(outcomes);
    }

    /// Register a historical video message with the given fingerprint.
    pub fn add_video(&self, message_id: MessageId, fingerprint: &str) {
        self.history.lock().unwrap().insert(
            message_id,
            Ok(json!({"video": {"file_id": "x", "file_unique_id": fingerprint}})),
        );
    }

    /// Register a historical text message.
    pub fn add_text(&self, message_id: MessageId, text: &str) {
        self.history
            .lock()
            .unwrap()
            .insert(message_id, Ok(json!({"text": text})));
    }

    /// Register a forward failure for a historical message.
    pub fn add_forward_error(&self, message_id: MessageId, error: TransportError) {
        self.history.lock().unwrap().insert(message_id, Err(error));
    }

    pub fn on_forward(&self, hook: impl Fn(MessageId) + Send + Sync + 'static) {
        *self.on_forward.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Targets of copies, in call order.
    pub fn copies(&self) -> Vec<ChatId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Copy { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn next_message_id(&self) -> MessageId {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn copy_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
        caption: Option<&str>,
        _caption_entities: Option<&Value>,
    ) -> TransportResult<MessageId> {
        self.record(Call::Copy {
            target,
            source,
            message_id,
            caption: caption.map(String::from),
        });
        let scripted = self
            .copy_script
            .lock()
            .unwrap()
            .get_mut(&target)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(self.next_message_id()))
    }

    async fn forward_message(
        &self,
        target: ChatId,
        source: ChatId,
        message_id: MessageId,
    ) -> TransportResult<ContentUnit> {
        self.record(Call::Forward {
            target,
            source,
            message_id,
        });
        if let Some(hook) = self.on_forward.lock().unwrap().as_ref() {
            hook(message_id);
        }
        let entry = self.history.lock().unwrap().get(&message_id).cloned();
        let mut body = match entry {
            Some(Ok(body)) => body,
            Some(Err(e)) => return Err(e),
            None => return Err(TransportError::NotFound("message to forward not found".into())),
        };
        let staged_id = self.next_message_id();
        body["message_id"] = json!(staged_id);
        body["chat"] = json!({"id": target});
        ContentUnit::from_message(&body)
            .ok_or_else(|| TransportError::Failed("malformed forward".into()))
    }

    async fn delete_message(&self, chat: ChatId, message_id: MessageId) -> TransportResult<()> {
        self.record(Call::Delete { chat, message_id });
        Ok(())
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> TransportResult<MessageId> {
        self.record(Call::Send {
            chat,
            text: text.to_string(),
        });
        Ok(self.next_message_id())
    }

    async fn edit_message_text(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        self.record(Call::Edit {
            chat,
            message_id,
            text: text.to_string(),
        });
        if self.fail_edits {
            return Err(TransportError::Failed("message can't be edited".into()));
        }
        Ok(())
    }

    async fn resolve_chat(&self, chat: ChatId) -> TransportResult<ChatInfo> {
        match self.titles.get(&chat) {
            Some(title) => Ok(ChatInfo {
                id: chat,
                title: Some(title.clone()),
            }),
            None => Err(TransportError::Failed("chat not found".into())),
        }
    }
}
