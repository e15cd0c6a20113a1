//! Telegram update handlers.
//!
//! Each handler translates a teloxide update into the transport-agnostic
//! `IncomingUpdate` and hands it to the core `CommandRouter`. Failures are
//! logged and swallowed so one bad update never stops the dispatcher.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, warn};

use grabtrio_core::{
    domain::{ChatId, UserId},
    messaging::{
        port::MessagingPort,
        types::{self, IncomingUpdate},
    },
    router::Handled,
};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        // Channel posts and service messages have no sender.
        return Ok(());
    };

    let update = incoming_from_text(ChatId(msg.chat.id.0), UserId(user.id.0 as i64), msg.text());
    dispatch(update, &state).await;
    Ok(())
}

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(message) = q.message.as_ref() else {
        // Inline-mode callbacks carry no chat; nothing to reply to.
        if let Err(e) = state
            .messenger
            .answer_callback_query(&q.id, None)
            .await
        {
            warn!(error = %e, "failed to answer callback");
        }
        return Ok(());
    };

    let update = IncomingUpdate::Callback(types::CallbackQuery {
        chat_id: ChatId(message.chat.id.0),
        user_id: UserId(q.from.id.0 as i64),
        callback_id: q.id.clone(),
        data: q.data.clone().unwrap_or_default(),
    });
    dispatch(update, &state).await;
    Ok(())
}

async fn dispatch(update: IncomingUpdate, state: &AppState) {
    let chat_id = update.chat_id().0;
    let user_id = update.user_id().0;
    match state.router.handle(update).await {
        Ok(Handled::Replied) => {}
        // The flow runs detached and logs its own outcome.
        Ok(Handled::DownloadStarted(_)) => debug!(user_id, chat_id, "download task spawned"),
        Err(e) => warn!(user_id, chat_id, error = %e, "failed to handle update"),
    }
}

/// Build the core update for a message. Commands are split off here so the
/// router only ever sees plain text in `Text`.
pub fn incoming_from_text(chat_id: ChatId, user_id: UserId, text: Option<&str>) -> IncomingUpdate {
    let Some(text) = text else {
        return IncomingUpdate::Other(types::OtherMessage { chat_id, user_id });
    };

    match parse_command(text) {
        Some(name) => IncomingUpdate::Command(types::Command {
            chat_id,
            user_id,
            name,
        }),
        None => IncomingUpdate::Text(types::TextMessage {
            chat_id,
            user_id,
            text: text.to_string(),
        }),
    }
}

/// `/Start@MyBot arg` -> `"start"`. Arguments are ignored.
pub fn parse_command(text: &str) -> Option<String> {
    let rest = text.strip_prefix('/')?;
    let head = rest.split(char::is_whitespace).next().unwrap_or_default();
    let name = head.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}
