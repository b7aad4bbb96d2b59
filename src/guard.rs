use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::platform::{ChatGateway, ChatId, LeaveOutcome};

/// Chats the bot is permitted to stay in. Fixed for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ids: Vec<ChatId>,
}

impl AllowList {
    /// Build from ids, dropping duplicates and keeping first-seen order
    pub fn from_ids(ids: impl IntoIterator<Item = ChatId>) -> Self {
        let mut unique = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self { ids: unique }
    }

    /// Parse a comma-separated list such as `-1001234567890,-4567`
    pub fn parse(list: &str) -> Result<Self> {
        let ids = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<ChatId>()
                    .with_context(|| format!("Invalid chat id in allow-list: '{}'", s))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_ids(ids))
    }

    pub fn contains(&self, chat_id: ChatId) -> bool {
        self.ids.contains(&chat_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ChatId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatKind::Private => write!(f, "private chat"),
            ChatKind::Group => write!(f, "group"),
            ChatKind::Supergroup => write!(f, "supergroup"),
            ChatKind::Channel => write!(f, "channel"),
        }
    }
}

/// The bot's own membership status after a change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    /// Whether the bot can still see messages in the chat
    pub fn is_present(self) -> bool {
        matches!(
            self,
            MemberStatus::Owner
                | MemberStatus::Administrator
                | MemberStatus::Member
                | MemberStatus::Restricted
        )
    }
}

/// Inbound traffic the guard reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// Any message observed in a chat
    Message { chat_id: ChatId },
    /// The bot's own membership changed
    Membership {
        chat_id: ChatId,
        chat_kind: ChatKind,
        new_status: MemberStatus,
    },
}

impl GuardEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            GuardEvent::Message { chat_id } | GuardEvent::Membership { chat_id, .. } => *chat_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Chat is authorized
    Stay,
    /// Nothing to do (the bot is not present)
    Ignore,
    Leave,
}

/// Keeps the bot out of chats that are not on the allow-list
#[derive(Clone)]
pub struct AuthorizationGuard {
    allow_list: Arc<AllowList>,
}

impl AuthorizationGuard {
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self { allow_list }
    }

    pub fn decide(&self, event: &GuardEvent) -> GuardDecision {
        let present = match event {
            GuardEvent::Message { .. } => true,
            GuardEvent::Membership { new_status, .. } => new_status.is_present(),
        };

        if !present {
            GuardDecision::Ignore
        } else if self.allow_list.contains(event.chat_id()) {
            GuardDecision::Stay
        } else {
            GuardDecision::Leave
        }
    }

    /// Apply the decision for `event`. Leave failures are logged and never
    /// returned to the caller.
    pub async fn enforce(&self, event: &GuardEvent, gateway: &dyn ChatGateway) -> GuardDecision {
        let decision = self.decide(event);
        if decision != GuardDecision::Leave {
            return decision;
        }

        let chat_id = event.chat_id();
        let trigger = match event {
            GuardEvent::Message { .. } => "new message detected".to_string(),
            GuardEvent::Membership { chat_kind, .. } => format!("{} membership change", chat_kind),
        };

        match gateway.leave_chat(chat_id).await {
            LeaveOutcome::Left => info!("Left unauthorized chat {} ({})", chat_id, trigger),
            LeaveOutcome::AlreadyGone => {
                debug!("Unauthorized chat {} was already left ({})", chat_id, trigger)
            }
            LeaveOutcome::Failed(reason) => {
                warn!("Failed to leave unauthorized chat {}: {}", chat_id, reason)
            }
        }

        decision
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::PlatformError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Outbound call recorded by [`RecordingGateway`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        SendText(ChatId, String),
        SendPoll(ChatId, String, Vec<String>, usize, bool),
        Leave(ChatId),
    }

    /// Gateway fake that records calls and fails on request
    pub struct RecordingGateway {
        pub calls: Mutex<Vec<Call>>,
        pub failing_chats: Vec<ChatId>,
        pub leave_outcome: LeaveOutcome,
    }

    impl RecordingGateway {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing_chats: Vec::new(),
                leave_outcome: LeaveOutcome::Left,
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn check(&self, chat_id: ChatId) -> Result<(), PlatformError> {
            if self.failing_chats.contains(&chat_id) {
                Err(PlatformError::Rejected(format!("send refused for {}", chat_id)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn bot_user_id(&self) -> Result<i64, PlatformError> {
            Ok(42)
        }

        async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<(), PlatformError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::SendText(chat_id, text.to_string()));
            self.check(chat_id)
        }

        async fn send_quiz_poll(
            &self,
            chat_id: ChatId,
            question: &str,
            options: &[String],
            correct_index: usize,
            anonymous: bool,
        ) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(Call::SendPoll(
                chat_id,
                question.to_string(),
                options.to_vec(),
                correct_index,
                anonymous,
            ));
            self.check(chat_id)
        }

        async fn leave_chat(&self, chat_id: ChatId) -> LeaveOutcome {
            self.calls.lock().unwrap().push(Call::Leave(chat_id));
            self.leave_outcome.clone()
        }
    }

    fn guard() -> AuthorizationGuard {
        AuthorizationGuard::new(Arc::new(AllowList::from_ids([100, 200])))
    }

    fn membership(chat_id: ChatId, new_status: MemberStatus) -> GuardEvent {
        GuardEvent::Membership {
            chat_id,
            chat_kind: ChatKind::Supergroup,
            new_status,
        }
    }

    #[test]
    fn test_allow_list_parse() {
        let list = AllowList::parse(" -1001234567890, 200 ,,200").unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![-1001234567890, 200]);
        assert!(list.contains(200));
        assert!(!list.contains(300));
    }

    #[test]
    fn test_allow_list_rejects_garbage() {
        assert!(AllowList::parse("100,abc").is_err());
    }

    #[test]
    fn test_decide() {
        let guard = guard();
        assert_eq!(guard.decide(&GuardEvent::Message { chat_id: 100 }), GuardDecision::Stay);
        assert_eq!(guard.decide(&GuardEvent::Message { chat_id: 300 }), GuardDecision::Leave);
        assert_eq!(
            guard.decide(&membership(300, MemberStatus::Member)),
            GuardDecision::Leave
        );
        assert_eq!(
            guard.decide(&membership(300, MemberStatus::Kicked)),
            GuardDecision::Ignore
        );
        assert_eq!(
            guard.decide(&membership(200, MemberStatus::Administrator)),
            GuardDecision::Stay
        );
    }

    #[tokio::test]
    async fn test_message_in_unauthorized_chat_leaves_once() {
        let gateway = RecordingGateway::new();
        guard()
            .enforce(&GuardEvent::Message { chat_id: 300 }, &gateway)
            .await;
        assert_eq!(gateway.calls(), vec![Call::Leave(300)]);
    }

    #[tokio::test]
    async fn test_message_in_authorized_chat_does_nothing() {
        let gateway = RecordingGateway::new();
        let decision = guard()
            .enforce(&GuardEvent::Message { chat_id: 100 }, &gateway)
            .await;
        assert_eq!(decision, GuardDecision::Stay);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_promoted_to_admin_in_unauthorized_chat_leaves() {
        let gateway = RecordingGateway::new();
        guard()
            .enforce(&membership(300, MemberStatus::Administrator), &gateway)
            .await;
        assert_eq!(gateway.calls(), vec![Call::Leave(300)]);
    }

    #[tokio::test]
    async fn test_left_status_issues_no_call() {
        let gateway = RecordingGateway::new();
        let decision = guard()
            .enforce(&membership(300, MemberStatus::Left), &gateway)
            .await;
        assert_eq!(decision, GuardDecision::Ignore);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_leave_failures_are_swallowed() {
        for outcome in [
            LeaveOutcome::AlreadyGone,
            LeaveOutcome::Failed("Forbidden: bot is not a member".to_string()),
        ] {
            let mut gateway = RecordingGateway::new();
            gateway.leave_outcome = outcome;
            let decision = guard()
                .enforce(&GuardEvent::Message { chat_id: 300 }, &gateway)
                .await;
            assert_eq!(decision, GuardDecision::Leave);
            assert_eq!(gateway.calls(), vec![Call::Leave(300)]);
        }
    }
}
