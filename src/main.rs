mod bot;
mod config;
mod guard;
mod platform;
mod quiz;
mod scheduler;
mod server;
mod trigger;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::platform::history::MtprotoHistory;
use crate::platform::telegram::TelegramGateway;
use crate::platform::ChatGateway;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,whosaid=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Usage: whosaid [config.toml] [--tick]
    let args: Vec<String> = std::env::args().skip(1).collect();
    let tick_only = args.iter().any(|a| a == "--tick");
    let config_path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!(
        "  Authorized chats: {:?}",
        config.telegram.authorized_chat_ids.iter().collect::<Vec<_>>()
    );
    info!("  History session: {}", config.history.session_path.display());
    info!("  Fetch limit: {}", config.history.fetch_limit);

    let gateway = Arc::new(TelegramGateway::new(&config.telegram)?);
    let chat_gateway: Arc<dyn ChatGateway> = gateway.clone();
    let history = Arc::new(MtprotoHistory::new(&config.history));
    let state = Arc::new(AppState::new(&config, chat_gateway, history));

    if tick_only {
        let report = state.run_tick().await?;
        if !report.failed.is_empty() {
            error!("{} chats failed during this tick", report.failed.len());
        }
        return Ok(());
    }

    if let Some(url) = &config.server.public_url {
        gateway
            .register_webhook(url, config.server.secret_token.as_deref())
            .await?;
    }

    let mut scheduler = match &config.schedule {
        Some(schedule) => {
            let scheduler = Scheduler::new().await?;
            scheduler::tasks::register_quiz_job(&scheduler, Arc::clone(&state), &schedule.cron)
                .await?;
            scheduler.start().await?;
            Some(scheduler)
        }
        None => None,
    };

    info!("Bot is starting...");
    server::serve(
        state,
        &config.server.bind_address,
        &config.server.invoke_path,
        config.server.secret_token.clone(),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        },
    )
    .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await?;
    }

    Ok(())
}
