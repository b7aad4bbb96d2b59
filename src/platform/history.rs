//! Chat history through an MTProto user session.
//!
//! The Bot API cannot read past messages, so history is fetched with a
//! regular user account whose session file is created ahead of time.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use grammers_client::types::Chat;
use grammers_client::{Client, Config as ClientConfig, InitParams};
use grammers_session::{PackedChat, PackedType, Session};
use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::platform::{
    ChatId, HistoryMessage, HistorySession, HistorySource, PlatformError, SenderProfile,
};

/// Bot API ids of channels and supergroups are `-(10^12 + id)`
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

fn history_err(err: impl std::fmt::Display) -> PlatformError {
    PlatformError::History(err.to_string())
}

pub struct MtprotoHistory {
    api_id: i32,
    api_hash: String,
    session_path: PathBuf,
}

impl MtprotoHistory {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            session_path: config.session_path.clone(),
        }
    }
}

#[async_trait]
impl HistorySource for MtprotoHistory {
    async fn open(&self) -> Result<Box<dyn HistorySession>, PlatformError> {
        let session = Session::load_file_or_create(&self.session_path)?;
        let client = Client::connect(ClientConfig {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(history_err)?;

        if !client.is_authorized().await.map_err(history_err)? {
            return Err(PlatformError::NotAuthorized);
        }

        info!("History session opened from {}", self.session_path.display());
        Ok(Box::new(MtprotoSession {
            client,
            session_path: self.session_path.clone(),
            chats: None,
        }))
    }
}

struct MtprotoSession {
    client: Client,
    session_path: PathBuf,
    /// Dialogs keyed by Bot API id, loaded on first use
    chats: Option<HashMap<ChatId, PackedChat>>,
}

impl MtprotoSession {
    async fn resolve(&mut self, chat_id: ChatId) -> Result<PackedChat, PlatformError> {
        if self.chats.is_none() {
            let mut chats = HashMap::new();
            let mut dialogs = self.client.iter_dialogs();
            while let Some(dialog) = dialogs.next().await.map_err(history_err)? {
                let packed = dialog.chat().pack();
                chats.insert(bot_api_id(&packed), packed);
            }
            debug!("Loaded {} dialogs", chats.len());
            self.chats = Some(chats);
        }

        self.chats
            .as_ref()
            .and_then(|chats| chats.get(&chat_id))
            .cloned()
            .ok_or(PlatformError::ChatNotFound(chat_id))
    }
}

#[async_trait]
impl HistorySession for MtprotoSession {
    async fn fetch(
        &mut self,
        chat_id: ChatId,
        exclude_sender: i64,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, PlatformError> {
        let packed = self.resolve(chat_id).await?;

        let mut messages = Vec::new();
        let mut iter = self.client.iter_messages(packed).limit(limit);
        while let Some(message) = iter.next().await.map_err(history_err)? {
            let text = message.text();
            if text.is_empty() {
                continue;
            }
            let sender = match message.sender() {
                Some(sender) if sender.id() != exclude_sender => sender,
                _ => continue,
            };
            messages.push(HistoryMessage {
                text: text.to_string(),
                sender: sender_profile(&sender).display_name(),
            });
        }

        info!("Fetched {} messages from chat {}", messages.len(), chat_id);
        Ok(messages)
    }

    async fn close(self: Box<Self>) -> Result<(), PlatformError> {
        self.client.session().save_to_file(&self.session_path)?;
        debug!("History session saved to {}", self.session_path.display());
        Ok(())
    }
}

fn sender_profile(sender: &Chat) -> SenderProfile {
    match sender {
        // full_name() already joins first and last name
        Chat::User(user) => SenderProfile {
            first_name: Some(user.full_name().trim().to_string()),
            last_name: None,
            username: user.username().map(str::to_string),
        },
        // Channels posting in a group only carry a handle
        other => SenderProfile {
            first_name: None,
            last_name: None,
            username: other.username().map(str::to_string),
        },
    }
}

/// Map an MTProto peer to the id the Bot API uses for the same chat
fn bot_api_id(packed: &PackedChat) -> ChatId {
    match packed.ty {
        PackedType::User | PackedType::Bot => packed.id,
        PackedType::Chat => -packed.id,
        PackedType::Megagroup | PackedType::Broadcast | PackedType::Gigagroup => {
            -(CHANNEL_ID_OFFSET + packed.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(ty: PackedType, id: i64) -> PackedChat {
        PackedChat {
            ty,
            id,
            access_hash: None,
        }
    }

    #[test]
    fn test_bot_api_ids() {
        assert_eq!(bot_api_id(&packed(PackedType::User, 777)), 777);
        assert_eq!(bot_api_id(&packed(PackedType::Chat, 4567)), -4567);
        assert_eq!(
            bot_api_id(&packed(PackedType::Megagroup, 1234567890)),
            -1001234567890
        );
        assert_eq!(
            bot_api_id(&packed(PackedType::Broadcast, 1234567890)),
            -1001234567890
        );
    }
}
