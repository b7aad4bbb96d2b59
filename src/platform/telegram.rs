use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::{SendPollSetters, SetWebhookSetters};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ChatMemberStatus, ChatMemberUpdated, InputPollOption, PollType, UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tracing::info;

use crate::config::TelegramConfig;
use crate::guard::{ChatKind, GuardEvent, MemberStatus};
use crate::platform::{truncate_chars, ChatGateway, LeaveOutcome, PlatformError};

/// Telegram's limit on the length of a single poll option
const MAX_POLL_OPTION_LEN: usize = crate::platform::MAX_SENDER_NAME_CHARS;
const MIN_POLL_OPTIONS: usize = 2;
const MAX_POLL_OPTIONS: usize = 10;

/// Bot API implementation of the outbound messaging operations
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            bot: Bot::with_client(&config.bot_token, client),
        })
    }

    /// Point Telegram's webhook at `url`, limited to the update kinds the
    /// guard consumes.
    pub async fn register_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid webhook URL: {}", url))?;

        let mut request = self.bot.set_webhook(url.clone()).allowed_updates(vec![
            AllowedUpdate::Message,
            AllowedUpdate::EditedMessage,
            AllowedUpdate::ChannelPost,
            AllowedUpdate::EditedChannelPost,
            AllowedUpdate::MyChatMember,
        ]);
        if let Some(secret) = secret_token {
            request = request.secret_token(secret.to_string());
        }
        request.await.context("Failed to register webhook")?;

        info!("Webhook registered at {}", url);
        Ok(())
    }
}

#[async_trait]
impl ChatGateway for TelegramGateway {
    async fn bot_user_id(&self) -> Result<i64, PlatformError> {
        let me = self.bot.get_me().await?;
        Ok(me.id.0 as i64)
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), PlatformError> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_quiz_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
        correct_index: usize,
        anonymous: bool,
    ) -> Result<(), PlatformError> {
        let options: Vec<InputPollOption> = poll_labels(options)?
            .into_iter()
            .map(InputPollOption::new)
            .collect();

        self.bot
            .send_poll(ChatId(chat_id), question, options)
            .type_(PollType::Quiz)
            .correct_option_id(correct_index as u8)
            .is_anonymous(anonymous)
            .await?;
        Ok(())
    }

    async fn leave_chat(&self, chat_id: i64) -> LeaveOutcome {
        match self.bot.leave_chat(ChatId(chat_id)).await {
            Ok(_) => LeaveOutcome::Left,
            Err(RequestError::Api(ApiError::BotKicked | ApiError::ChatNotFound)) => {
                LeaveOutcome::AlreadyGone
            }
            Err(e) => LeaveOutcome::Failed(e.to_string()),
        }
    }
}

/// Validate and truncate poll option labels. Labels that only differ past
/// the length limit would show up as identical options, so they are refused.
fn poll_labels(options: &[String]) -> Result<Vec<String>, PlatformError> {
    if !(MIN_POLL_OPTIONS..=MAX_POLL_OPTIONS).contains(&options.len()) {
        return Err(PlatformError::Rejected(format!(
            "quiz polls need {} to {} options, got {}",
            MIN_POLL_OPTIONS,
            MAX_POLL_OPTIONS,
            options.len()
        )));
    }

    let labels: Vec<String> = options
        .iter()
        .map(|o| truncate_chars(o, MAX_POLL_OPTION_LEN).to_string())
        .collect();
    let distinct: HashSet<&str> = labels.iter().map(String::as_str).collect();
    if distinct.len() != labels.len() {
        return Err(PlatformError::Rejected(
            "quiz options are not distinct once truncated".to_string(),
        ));
    }
    Ok(labels)
}

/// Translate an inbound update into the event the authorization guard
/// reacts to. Updates of other kinds yield `None`.
pub fn guard_event(update: &Update) -> Option<GuardEvent> {
    match &update.kind {
        UpdateKind::Message(msg)
        | UpdateKind::EditedMessage(msg)
        | UpdateKind::ChannelPost(msg)
        | UpdateKind::EditedChannelPost(msg) => Some(GuardEvent::Message {
            chat_id: msg.chat.id.0,
        }),
        UpdateKind::MyChatMember(change) => Some(membership_event(change)),
        _ => None,
    }
}

fn membership_event(change: &ChatMemberUpdated) -> GuardEvent {
    let chat = &change.chat;
    let chat_kind = if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_group() {
        ChatKind::Group
    } else {
        ChatKind::Private
    };

    let new_status = match change.new_chat_member.kind.status() {
        ChatMemberStatus::Owner => MemberStatus::Owner,
        ChatMemberStatus::Administrator => MemberStatus::Administrator,
        ChatMemberStatus::Member => MemberStatus::Member,
        ChatMemberStatus::Restricted => MemberStatus::Restricted,
        ChatMemberStatus::Left => MemberStatus::Left,
        ChatMemberStatus::Banned => MemberStatus::Kicked,
    };

    GuardEvent::Membership {
        chat_id: chat.id.0,
        chat_kind,
        new_status,
    }
}
