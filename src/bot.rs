//! Bot runtime: routes platform updates to the operator console and the
//! relay engine.
//!
//! Updates are handled one at a time. Migration runs are spawned so the
//! loop keeps relaying (and can take `/stop`) while a run is in progress.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::commands::{ConsoleAction, OperatorConsole};
use crate::media::ContentUnit;
use crate::relay::RelayEngine;
use crate::transport::{ChatId, Transport};

/// What the poll loop should do after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotControl {
    Continue,
    Shutdown,
}

pub struct RelayBot {
    engine: Arc<RelayEngine>,
    console: OperatorConsole,
    transport: Arc<dyn Transport>,
    admin_id: ChatId,
}

impl RelayBot {
    pub fn new(
        engine: Arc<RelayEngine>,
        console: OperatorConsole,
        transport: Arc<dyn Transport>,
        admin_id: ChatId,
    ) -> Self {
        Self {
            engine,
            console,
            transport,
            admin_id,
        }
    }

    /// Consume updates until the stream ends, `/stop` shuts down, or Ctrl-C.
    pub async fn run(&self, updates: impl Stream<Item = Value>) {
        let mut updates = std::pin::pin!(updates);
        loop {
            tokio::select! {
                update = updates.next() => {
                    let Some(update) = update else {
                        info!("Update stream ended");
                        break;
                    };
                    if self.handle_update(&update).await == BotControl::Shutdown {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received");
                    break;
                }
            }
        }
        if self.engine.request_stop() {
            info!("Stopped running migration on shutdown");
        }
        info!("Bot stopped");
    }

    /// Route one raw update.
    pub async fn handle_update(&self, update: &Value) -> BotControl {
        if let Some(post) = update.get("channel_post") {
            self.relay(post).await;
            return BotControl::Continue;
        }
        let Some(message) = update.get("message") else {
            debug!("Ignoring unsupported update");
            return BotControl::Continue;
        };

        if let Some(text) = message.get("text").and_then(Value::as_str)
            && text.trim_start().starts_with('/')
        {
            return self.command(message, text).await;
        }
        self.relay(message).await;
        BotControl::Continue
    }

    async fn relay(&self, message: &Value) {
        let Some(unit) = ContentUnit::from_message(message) else {
            debug!("Ignoring message without chat or id");
            return;
        };
        self.engine.handle_incoming(&unit).await;
    }

    async fn command(&self, message: &Value, text: &str) -> BotControl {
        let sender = message
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(Value::as_i64);
        if sender != Some(self.admin_id) {
            warn!(sender = ?sender, "Ignoring command from non-admin");
            return BotControl::Continue;
        }
        let chat = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or(self.admin_id);

        let Some(reply) = self.console.handle(text).await else {
            return BotControl::Continue;
        };

        let sent = self.transport.send_message(chat, &reply.text).await;
        if let Err(e) = &sent {
            warn!(chat, error = %e, "Failed to send command reply");
        }

        match reply.action {
            ConsoleAction::None => BotControl::Continue,
            ConsoleAction::Shutdown => BotControl::Shutdown,
            ConsoleAction::Migrate(run) => {
                let run = match sent {
                    Ok(id) => run.with_status_message(chat, id),
                    Err(_) => run,
                };
                tokio::spawn(async move {
                    run.run().await;
                });
                BotControl::Continue
            }
        }
    }
}
