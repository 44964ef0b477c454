//! Operator notifications, gated by the admin-notification policy.
//!
//! Sending is best effort: failures are logged and never surface to the
//! caller.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RelaySettings;
use crate::transport::{ChatId, Transport};

#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn Transport>,
    settings: Arc<RwLock<RelaySettings>>,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<RwLock<RelaySettings>>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Report a delivery failure, if error notifications are on.
    pub async fn error(&self, text: &str) {
        let settings = self.settings.read().await;
        let notify = &settings.notifications;
        if !(notify.enabled && notify.notify_on_error) {
            debug!("Error notification suppressed by policy");
            return;
        }
        let chat = settings.admin_chat_id;
        drop(settings);
        self.send(chat, text).await;
    }

    /// Announce startup, if start notifications are on.
    pub async fn startup(&self, text: &str) {
        let settings = self.settings.read().await;
        let notify = &settings.notifications;
        if !(notify.enabled && notify.notify_on_start) {
            return;
        }
        let chat = settings.admin_chat_id;
        drop(settings);
        self.send(chat, text).await;
    }

    async fn send(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.transport.send_message(chat, text).await {
            warn!(chat, error = %e, "Failed to notify operator");
        }
    }
}
