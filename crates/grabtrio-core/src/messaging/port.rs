use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{ChatAction, InlineKeyboard, MessagingCapabilities, ReplyKeyboard},
    Result,
};

/// Outbound half of the message transport.
///
/// The router and the download flow only talk to this trait; the Telegram
/// adapter (and test fakes) implement it.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;

    /// Send text together with a persistent reply keyboard (quick replies).
    async fn send_menu(&self, chat_id: ChatId, html: &str, menu: &ReplyKeyboard)
        -> Result<MessageRef>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    /// Upload a local file as a video attachment.
    async fn send_video(&self, chat_id: ChatId, path: &Path) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
