use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use media_relay::bot::RelayBot;
use media_relay::clock::SystemClock;
use media_relay::commands::OperatorConsole;
use media_relay::config::{DEFAULT_CONFIG_PATH, RelayConfig};
use media_relay::relay::{RelayDeps, RelayEngine, spawn_retention_task};
use media_relay::rules::{JsonRuleStore, RuleIndex};
use media_relay::store::LibSqlBackend;
use media_relay::transport::{TelegramTransport, Transport};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path = PathBuf::from(
        std::env::var("RELAY_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
    );
    let config = RelayConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Logs go to stdout and a daily rolling file.
    std::fs::create_dir_all(&config.log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "relay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    eprintln!("📦 Media relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", config_path.display());
    eprintln!("   Database: {}", config.database_path.display());

    // ── Transport ────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramTransport::new(config.token()));
    let username = telegram
        .health_check()
        .await
        .context("bot token rejected by getMe")?;
    tracing::info!(username = %username, "Connected to Telegram");
    let transport: Arc<dyn Transport> = telegram.clone();

    // ── Database ─────────────────────────────────────────────────────────
    let dedup = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?,
    );

    // ── Rules ────────────────────────────────────────────────────────────
    let rule_store = Arc::new(JsonRuleStore::new(&config_path));
    let rules = Arc::new(RuleIndex::load(rule_store).await?);

    let engine = Arc::new(RelayEngine::new(
        RelayDeps {
            transport: transport.clone(),
            dedup,
            rules,
            clock: Arc::new(SystemClock),
        },
        config.settings(),
    ));

    match engine.purge_expired().await {
        Ok(purged) => tracing::info!(purged, "Startup retention sweep done"),
        Err(e) => tracing::warn!(error = %e, "Startup retention sweep failed"),
    }
    let _retention = spawn_retention_task(engine.clone());

    let rule_count = engine.list_rules().await.len();
    engine
        .notifier()
        .startup(&format!(
            "🤖 Media relay started\nRules: {rule_count}\nDeduplication: {}",
            if config.features.deduplication.enabled { "on" } else { "off" }
        ))
        .await;

    // ── Poll loop ────────────────────────────────────────────────────────
    let offset = match telegram.skip_pending().await {
        Ok(offset) => offset,
        Err(e) => {
            tracing::warn!(error = %e, "Could not drop pending updates");
            0
        }
    };
    let console = OperatorConsole::new(engine.clone(), &config_path);
    let bot = RelayBot::new(engine, console, transport, config.admin_user_id);
    bot.run(telegram.updates(offset)).await;

    Ok(())
}
