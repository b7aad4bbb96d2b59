pub mod history;
pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

/// Bot API style chat identifier (negative for groups and channels)
pub type ChatId = i64;

/// Longest sender name kept; matches Telegram's poll option limit
pub const MAX_SENDER_NAME_CHARS: usize = 100;

/// Cut `text` to at most `max_chars` characters
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Optional-field identity of a message sender, as reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl SenderProfile {
    /// Build the display name shown as a quiz option.
    ///
    /// Non-empty first and last name are joined with a space, the username is
    /// appended in parentheses, and a sender with neither becomes `Unknown`.
    /// Names are capped at [`MAX_SENDER_NAME_CHARS`] so two senders that only
    /// differ past the cap count as one quiz option.
    pub fn display_name(&self) -> SenderName {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        let username = self.username.as_deref().filter(|u| !u.is_empty());

        let name = match (parts.is_empty(), username) {
            (false, Some(user)) => format!("{} ({})", parts.join(" "), user),
            (true, Some(user)) => format!("({})", user),
            (false, None) => parts.join(" "),
            (true, None) => "Unknown".to_string(),
        };
        SenderName(truncate_chars(&name, MAX_SENDER_NAME_CHARS).to_string())
    }
}

/// Display string for a sender. Equal names are treated as the same option,
/// even when they belong to different people.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SenderName(String);

impl SenderName {
    #[cfg(test)]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SenderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A text message pulled from chat history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub text: String,
    pub sender: SenderName,
}

/// Result of asking the platform to leave a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    /// The bot was no longer in the chat
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("history request failed: {0}")]
    History(String),
    #[error("history session is not signed in")]
    NotAuthorized,
    #[error("chat {0} is not visible to the history session")]
    ChatNotFound(ChatId),
    #[error("session storage error: {0}")]
    Session(#[from] std::io::Error),
}

/// Outbound messaging operations
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// User id of the bot account itself
    async fn bot_user_id(&self) -> Result<i64, PlatformError>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), PlatformError>;

    async fn send_quiz_poll(
        &self,
        chat_id: ChatId,
        question: &str,
        options: &[String],
        correct_index: usize,
        anonymous: bool,
    ) -> Result<(), PlatformError>;

    async fn leave_chat(&self, chat_id: ChatId) -> LeaveOutcome;
}

/// Opens history sessions. One session is used per scheduled tick.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn HistorySession>, PlatformError>;
}

#[async_trait]
pub trait HistorySession: Send {
    /// Most recent text messages of `chat_id`, newest first, skipping
    /// messages without text and messages sent by `exclude_sender`.
    async fn fetch(
        &mut self,
        chat_id: ChatId,
        exclude_sender: i64,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError>;

    async fn close(self: Box<Self>) -> Result<(), PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(first: &str, last: &str, username: Option<&str>) -> SenderProfile {
        SenderProfile {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn test_first_name_with_username() {
        let name = profile("Ada", "", Some("ada99")).display_name();
        assert_eq!(name.as_str(), "Ada (ada99)");
    }

    #[test]
    fn test_username_only() {
        let name = profile("", "", Some("bob")).display_name();
        assert_eq!(name.as_str(), "(bob)");
    }

    #[test]
    fn test_no_name_no_username_is_unknown() {
        assert_eq!(profile("", "", None).display_name().as_str(), "Unknown");
        assert_eq!(SenderProfile::default().display_name().as_str(), "Unknown");
    }

    #[test]
    fn test_full_name_without_username() {
        let name = profile("Grace", "Hopper", None).display_name();
        assert_eq!(name.as_str(), "Grace Hopper");
    }

    #[test]
    fn test_full_name_with_username() {
        let name = profile("Grace", "Hopper", Some("ghopper")).display_name();
        assert_eq!(name.to_string(), "Grace Hopper (ghopper)");
    }

    #[test]
    fn test_last_name_only() {
        let profile = SenderProfile {
            first_name: None,
            last_name: Some("Lovelace".to_string()),
            username: None,
        };
        assert_eq!(profile.display_name().as_str(), "Lovelace");
    }

    #[test]
    fn test_long_names_are_capped() {
        let long = "z".repeat(120);
        let first = profile(&long, "", Some("one")).display_name();
        let second = profile(&long, "", Some("two")).display_name();
        assert_eq!(first.as_str().chars().count(), MAX_SENDER_NAME_CHARS);
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("ééééé", 3), "ééé");
    }
}
