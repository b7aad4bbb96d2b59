use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::guard::AllowList;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub history: HistoryConfig,
    pub quiz: QuizConfig,
    pub server: ServerConfig,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub authorized_chat_ids: AllowList,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_path: PathBuf,
    pub fetch_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizConfig {
    pub max_distractors: usize,
    pub min_distractors: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub invoke_path: String,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value
    pub secret_token: Option<String>,
    /// Public URL to register as the Telegram webhook at startup
    pub public_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Six-field cron expression (seconds first)
    pub cron: String,
}

// ── Raw TOML structs (loose, so env vars can fill the gaps) ──

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    telegram: RawTelegram,
    #[serde(default)]
    history: RawHistory,
    #[serde(default)]
    quiz: RawQuiz,
    #[serde(default)]
    server: RawServer,
    #[serde(default)]
    schedule: RawSchedule,
}

#[derive(Deserialize, Default)]
struct RawTelegram {
    bot_token: Option<String>,
    authorized_chat_ids: Option<Vec<i64>>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
struct RawHistory {
    api_id: Option<i32>,
    api_hash: Option<String>,
    session_path: Option<PathBuf>,
    fetch_limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct RawQuiz {
    max_distractors: Option<usize>,
    min_distractors: Option<usize>,
}

#[derive(Deserialize, Default)]
struct RawServer {
    bind_address: Option<String>,
    invoke_path: Option<String>,
    secret_token: Option<String>,
    public_url: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawSchedule {
    cron: Option<String>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_session_path() -> PathBuf {
    PathBuf::from("/tmp/session")
}

fn default_fetch_limit() -> usize {
    1000
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_invoke_path() -> String {
    "/".to_string()
}

/// Treat empty strings the same as absent values
fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    /// Load `.env`, then the TOML file at `path` (if present), then apply
    /// environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if let Ok(env_path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", env_path.display());
        }

        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else {
            tracing::info!(
                "No config file at {}, using environment only",
                path.display()
            );
            None
        };

        Self::from_parts(content.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from optional TOML text and an environment lookup
    pub fn from_parts(toml_text: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw: RawConfig = match toml_text {
            Some(text) => toml::from_str(text).context("Failed to parse config file")?,
            None => RawConfig::default(),
        };

        let bot_token = non_empty(env("BOT_TOKEN"))
            .or(non_empty(raw.telegram.bot_token))
            .context("Missing Telegram bot token (telegram.bot_token or BOT_TOKEN)")?;

        let authorized_chat_ids = match non_empty(env("AUTHORIZED_GROUP_IDS")) {
            Some(list) => AllowList::parse(&list).context("Failed to parse AUTHORIZED_GROUP_IDS")?,
            None => AllowList::from_ids(raw.telegram.authorized_chat_ids.unwrap_or_default()),
        };
        if authorized_chat_ids.is_empty() {
            bail!("No authorized chats configured (telegram.authorized_chat_ids or AUTHORIZED_GROUP_IDS)");
        }

        let api_id = match non_empty(env("API_ID")) {
            Some(id) => id
                .parse::<i32>()
                .with_context(|| format!("API_ID is not a number: '{}'", id))?,
            None => raw
                .history
                .api_id
                .context("Missing MTProto api id (history.api_id or API_ID)")?,
        };

        let api_hash = non_empty(env("API_HASH"))
            .or(non_empty(raw.history.api_hash))
            .context("Missing MTProto api hash (history.api_hash or API_HASH)")?;

        let session_path = non_empty(env("SESSION_PATH"))
            .map(PathBuf::from)
            .or(raw.history.session_path)
            .unwrap_or_else(default_session_path);

        let fetch_limit = raw.history.fetch_limit.unwrap_or_else(default_fetch_limit);
        if fetch_limit == 0 {
            bail!("history.fetch_limit must be at least 1");
        }

        let quiz = QuizConfig {
            max_distractors: raw.quiz.max_distractors.unwrap_or(4),
            min_distractors: raw.quiz.min_distractors.unwrap_or(1),
        };
        if quiz.min_distractors > quiz.max_distractors {
            bail!(
                "quiz.min_distractors ({}) exceeds quiz.max_distractors ({})",
                quiz.min_distractors,
                quiz.max_distractors
            );
        }

        let invoke_path = raw.server.invoke_path.unwrap_or_else(default_invoke_path);
        if !invoke_path.starts_with('/') {
            bail!("server.invoke_path must start with '/': {}", invoke_path);
        }

        let server = ServerConfig {
            bind_address: non_empty(env("BIND_ADDRESS"))
                .or(raw.server.bind_address)
                .unwrap_or_else(default_bind_address),
            invoke_path,
            secret_token: non_empty(env("WEBHOOK_SECRET")).or(non_empty(raw.server.secret_token)),
            public_url: non_empty(env("PUBLIC_URL")).or(non_empty(raw.server.public_url)),
        };

        let schedule = non_empty(env("QUIZ_CRON"))
            .or(non_empty(raw.schedule.cron))
            .map(|cron| ScheduleConfig { cron });

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                authorized_chat_ids,
                connect_timeout_secs: raw
                    .telegram
                    .connect_timeout_secs
                    .unwrap_or_else(default_timeout_secs),
                request_timeout_secs: raw
                    .telegram
                    .request_timeout_secs
                    .unwrap_or_else(default_timeout_secs),
            },
            history: HistoryConfig {
                api_id,
                api_hash,
                session_path,
                fetch_limit,
            },
            quiz,
            server,
            schedule,
        })
    }
}
