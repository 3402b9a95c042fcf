use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{ChatAction, ChatId, MessageId};

use crate::catalog::Keyboard;

/// Outbound side of the chat platform, as seen by the handlers.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageId>;

    async fn edit_text(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        photo: Vec<u8>,
    ) -> Result<MessageId>;

    async fn send_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    /// Fetches the bytes of a photo the user sent.
    async fn download_photo(&self, file_id: &str) -> Result<Vec<u8>>;
}
