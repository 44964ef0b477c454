//! Operator commands: parsing and execution against the relay engine.
//!
//! Every recognized command produces exactly one reply. Argument errors
//! reply with the command's usage line.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::{CommandError, Error};
use crate::relay::{MigrationRequest, MigrationRun, RelayEngine};
use crate::rules::ForwardingRule;
use crate::transport::ChatId;

const ADD_USAGE: &str = "/add <source_id> <target_id>";
const DEL_USAGE: &str = "/del <source_id> [target_id]";
const MIGRATE_USAGE: &str = "/migrate <source_id> <target_id> <start_id> <end_id>";

const HELP_TEXT: &str = "Media relay commands:\n\
/add <source_id> <target_id> - add a forwarding target\n\
/del <source_id> [target_id] - remove a rule or one target\n\
/list - show forwarding rules\n\
/stats - delivery statistics\n\
/reload - reload configuration and rules\n\
/migrate <source_id> <target_id> <start_id> <end_id> - copy historical videos\n\
/stop - stop a running migration, otherwise shut down\n\
/help - this message";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Add { source: ChatId, target: ChatId },
    Remove { source: ChatId, target: Option<ChatId> },
    List,
    Stats,
    Reload,
    Migrate(MigrationRequest),
    Stop,
    Help,
}

/// Parses operator text into commands.
pub struct CommandParser;

impl CommandParser {
    /// Parse a message. `None` when the text is not a command at all.
    pub fn parse(text: &str) -> Option<Result<OperatorCommand, CommandError>> {
        let trimmed = text.trim();
        if !trimmed.starts_with('/') {
            return None;
        }
        let mut parts = trimmed.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<&str> = parts.collect();

        let command = match name.as_str() {
            "/add" => parse_add(&args),
            "/del" => parse_del(&args),
            "/list" => Ok(OperatorCommand::List),
            "/stats" => Ok(OperatorCommand::Stats),
            "/reload" => Ok(OperatorCommand::Reload),
            "/migrate" => parse_migrate(&args),
            "/stop" => Ok(OperatorCommand::Stop),
            "/help" | "/start" => Ok(OperatorCommand::Help),
            _ => Err(CommandError::Unknown(name)),
        };
        Some(command)
    }
}

fn parse_id(raw: &str) -> Result<i64, CommandError> {
    raw.parse::<i64>()
        .map_err(|_| CommandError::InvalidId(raw.to_string()))
}

/// `/add <source_id> <target_id>`
fn parse_add(args: &[&str]) -> Result<OperatorCommand, CommandError> {
    let [source, target] = args else {
        return Err(CommandError::Usage { usage: ADD_USAGE });
    };
    Ok(OperatorCommand::Add {
        source: parse_id(source)?,
        target: parse_id(target)?,
    })
}

/// `/del <source_id> [target_id]`
fn parse_del(args: &[&str]) -> Result<OperatorCommand, CommandError> {
    match args {
        [source] => Ok(OperatorCommand::Remove {
            source: parse_id(source)?,
            target: None,
        }),
        [source, target] => Ok(OperatorCommand::Remove {
            source: parse_id(source)?,
            target: Some(parse_id(target)?),
        }),
        _ => Err(CommandError::Usage { usage: DEL_USAGE }),
    }
}

/// `/migrate <source_id> <target_id> <start_id> <end_id>`
fn parse_migrate(args: &[&str]) -> Result<OperatorCommand, CommandError> {
    let [source, target, start, end] = args else {
        return Err(CommandError::Usage {
            usage: MIGRATE_USAGE,
        });
    };
    Ok(OperatorCommand::Migrate(MigrationRequest {
        source_id: parse_id(source)?,
        target_id: parse_id(target)?,
        start_id: parse_id(start)?,
        end_id: parse_id(end)?,
    }))
}

/// Follow-up work the runtime performs after sending the reply.
pub enum ConsoleAction {
    None,
    /// Drive this run in the background; the reply message becomes its
    /// status board.
    Migrate(MigrationRun),
    Shutdown,
}

/// One acknowledgment plus its follow-up.
pub struct ConsoleReply {
    pub text: String,
    pub action: ConsoleAction,
}

impl ConsoleReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ConsoleAction::None,
        }
    }
}

/// Executes operator commands against the engine.
pub struct OperatorConsole {
    engine: Arc<RelayEngine>,
    config_path: PathBuf,
}

impl OperatorConsole {
    pub fn new(engine: Arc<RelayEngine>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            config_path: config_path.into(),
        }
    }

    /// Handle operator text. `None` when the text is not a command.
    pub async fn handle(&self, text: &str) -> Option<ConsoleReply> {
        let reply = match CommandParser::parse(text)? {
            Ok(command) => {
                info!(command = ?command, "Operator command");
                self.execute(command).await
            }
            Err(e @ CommandError::Unknown(_)) => {
                ConsoleReply::text(format!("❓ {e}. Send /help for the command list."))
            }
            Err(e) => ConsoleReply::text(format!("❌ {e}")),
        };
        Some(reply)
    }

    async fn execute(&self, command: OperatorCommand) -> ConsoleReply {
        match command {
            OperatorCommand::Add { source, target } => {
                match self.engine.add_rule(source, target).await {
                    Ok(rule) => ConsoleReply::text(format!(
                        "✅ Rule added\nFrom: {}\nTo: {}",
                        rule.source_label(),
                        rule.target_label(target)
                    )),
                    Err(e) => ConsoleReply::text(format!("❌ Failed to save rule: {e}")),
                }
            }
            OperatorCommand::Remove {
                source,
                target: None,
            } => match self.engine.remove_rule(source).await {
                Ok(true) => ConsoleReply::text(format!("🗑 Rule for {source} removed")),
                Ok(false) => ConsoleReply::text(format!("No rule found for {source}")),
                Err(e) => ConsoleReply::text(format!("❌ Failed to save rules: {e}")),
            },
            OperatorCommand::Remove {
                source,
                target: Some(target),
            } => match self.engine.remove_target(source, target).await {
                Ok(true) => ConsoleReply::text(format!("🗑 Target {target} removed from {source}")),
                Ok(false) => ConsoleReply::text(format!("No target {target} under {source}")),
                Err(e) => ConsoleReply::text(format!("❌ Failed to save rules: {e}")),
            },
            OperatorCommand::List => {
                ConsoleReply::text(format_rules(&self.engine.list_rules().await))
            }
            OperatorCommand::Stats => self.stats().await,
            OperatorCommand::Reload => self.reload().await,
            OperatorCommand::Migrate(request) => match self.engine.start_migration(request) {
                Ok(run) => {
                    let request = run.request();
                    ConsoleReply {
                        text: format!(
                            "🔄 Migration starting\nFrom {} to {}, messages {}..{}",
                            request.source_id, request.target_id, request.start_id, request.end_id
                        ),
                        action: ConsoleAction::Migrate(run),
                    }
                }
                Err(e) => ConsoleReply::text(format!("❌ {e}")),
            },
            OperatorCommand::Stop => {
                if self.engine.request_stop() {
                    ConsoleReply::text("⏹ Stopping migration after the current message")
                } else {
                    ConsoleReply {
                        text: "👋 Shutting down".into(),
                        action: ConsoleAction::Shutdown,
                    }
                }
            }
            OperatorCommand::Help => ConsoleReply::text(HELP_TEXT),
        }
    }

    async fn stats(&self) -> ConsoleReply {
        let rules = self.engine.list_rules().await;
        let active = rules.iter().filter(|r| r.enabled).count();
        match self.engine.stats().await {
            Ok(stats) => ConsoleReply::text(format!(
                "📊 Statistics\nTotal forwarded: {}\nToday: {}\nActive rules: {}",
                stats.total_delivered, stats.delivered_today, active
            )),
            Err(e) => {
                warn!(error = %e, "Stats query failed");
                ConsoleReply::text(format!("❌ Failed to read statistics: {e}"))
            }
        }
    }

    async fn reload(&self) -> ConsoleReply {
        match self.reload_config().await {
            Ok(count) => ConsoleReply::text(format!("🔄 Configuration reloaded ({count} rules)")),
            Err(e) => {
                warn!(error = %e, "Reload failed");
                ConsoleReply::text(format!("❌ Reload failed: {e}"))
            }
        }
    }

    /// Validate the config file first so a bad edit leaves the running
    /// settings and rules untouched.
    async fn reload_config(&self) -> Result<usize, Error> {
        let settings = RelayConfig::load(&self.config_path)?.settings();
        Ok(self.engine.reload(Some(settings)).await?)
    }
}

fn format_rules(rules: &[ForwardingRule]) -> String {
    if rules.is_empty() {
        return "No forwarding rules configured.".into();
    }
    let mut out = String::from("📋 Forwarding rules:");
    for rule in rules {
        let marker = if rule.enabled { "🟢" } else { "⚪" };
        out.push_str(&format!("\n\n{marker} {}", rule.source_label()));
        for &target in &rule.target_ids {
            out.push_str(&format!("\n  → {}", rule.target_label(target)));
        }
        if !rule.keywords_blacklist.is_empty() {
            out.push_str(&format!("\n  blacklist: {}", rule.keywords_blacklist.join(", ")));
        }
        if !rule.keywords_whitelist.is_empty() {
            out.push_str(&format!("\n  whitelist: {}", rule.keywords_whitelist.join(", ")));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::SystemClock;
    use crate::config::RelaySettings;
    use crate::relay::RelayDeps;
    use crate::relay::testing::ScriptedTransport;
    use crate::rules::{JsonRuleStore, RuleIndex};
    use crate::store::LibSqlBackend;

    #[test]
    fn parse_non_command_is_none() {
        assert!(CommandParser::parse("hello").is_none());
        assert!(CommandParser::parse("").is_none());
    }

    #[test]
    fn parse_is_case_insensitive_and_strips_bot_name() {
        assert_eq!(
            CommandParser::parse("/LIST@relay_bot"),
            Some(Ok(OperatorCommand::List))
        );
        assert_eq!(
            CommandParser::parse("  /Add -100 -200 "),
            Some(Ok(OperatorCommand::Add {
                source: -100,
                target: -200
            }))
        );
    }

    #[test]
    fn parse_del_with_and_without_target() {
        assert_eq!(
            CommandParser::parse("/del -1"),
            Some(Ok(OperatorCommand::Remove {
                source: -1,
                target: None
            }))
        );
        assert_eq!(
            CommandParser::parse("/del -1 -2"),
            Some(Ok(OperatorCommand::Remove {
                source: -1,
                target: Some(-2)
            }))
        );
        assert_eq!(
            CommandParser::parse("/del"),
            Some(Err(CommandError::Usage { usage: DEL_USAGE }))
        );
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            CommandParser::parse("/add 1"),
            Some(Err(CommandError::Usage { usage: ADD_USAGE }))
        );
        assert_eq!(
            CommandParser::parse("/add one 2"),
            Some(Err(CommandError::InvalidId("one".into())))
        );
        assert_eq!(
            CommandParser::parse("/frobnicate"),
            Some(Err(CommandError::Unknown("/frobnicate".into())))
        );
    }

    #[test]
    fn parse_migrate() {
        assert_eq!(
            CommandParser::parse("/migrate -1 -2 50 10"),
            Some(Ok(OperatorCommand::Migrate(MigrationRequest {
                source_id: -1,
                target_id: -2,
                start_id: 50,
                end_id: 10,
            })))
        );
    }

    async fn console(tmp: &tempfile::TempDir) -> OperatorConsole {
        let store = Arc::new(JsonRuleStore::new(tmp.path().join("config.json")));
        let rules = Arc::new(RuleIndex::load(store).await.unwrap());
        let engine = RelayEngine::new(
            RelayDeps {
                transport: Arc::new(ScriptedTransport::new().with_title(-100, "News")),
                dedup: Arc::new(LibSqlBackend::new_memory().await.unwrap()),
                rules,
                clock: Arc::new(SystemClock),
            },
            RelaySettings {
                admin_chat_id: 1,
                ..Default::default()
            },
        );
        OperatorConsole::new(Arc::new(engine), tmp.path().join("config.json"))
    }

    #[tokio::test]
    async fn add_list_del_round() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/add -100 -200").await.unwrap();
        assert!(reply.text.contains("News (-100)"));
        assert!(reply.text.contains("-200"));

        let list = console.handle("/list").await.unwrap();
        assert!(list.text.contains("→ -200"));

        let del = console.handle("/del -100").await.unwrap();
        assert!(del.text.contains("removed"));
        let del = console.handle("/del -100").await.unwrap();
        assert!(del.text.starts_with("No rule found"));

        let list = console.handle("/list").await.unwrap();
        assert_eq!(list.text, "No forwarding rules configured.");
    }

    #[tokio::test]
    async fn usage_reply_on_bad_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/migrate 1 2").await.unwrap();
        assert!(reply.text.contains(MIGRATE_USAGE));
        assert!(matches!(reply.action, ConsoleAction::None));
    }

    #[tokio::test]
    async fn stop_without_migration_shuts_down() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/stop").await.unwrap();
        assert!(matches!(reply.action, ConsoleAction::Shutdown));
    }

    #[tokio::test]
    async fn migrate_then_stop_then_reject() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/migrate -1 -2 10 1").await.unwrap();
        assert!(reply.text.contains("messages 1..10"));
        let ConsoleAction::Migrate(run) = reply.action else {
            panic!("expected a migration run");
        };

        let again = console.handle("/migrate -1 -2 1 5").await.unwrap();
        assert!(again.text.contains("already running"));

        let stop = console.handle("/stop").await.unwrap();
        assert!(matches!(stop.action, ConsoleAction::None));
        assert!(stop.text.contains("Stopping"));
        drop(run);
    }

    #[tokio::test]
    async fn reload_reports_missing_config() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/reload").await.unwrap();
        assert!(reply.text.starts_with("❌ Reload failed: Configuration error"));
    }

    #[tokio::test]
    async fn stats_reply() {
        let tmp = tempfile::tempdir().unwrap();
        let console = console(&tmp).await;

        let reply = console.handle("/stats").await.unwrap();
        assert!(reply.text.contains("Total forwarded: 0"));
        assert!(reply.text.contains("Today: 0"));
    }
}
