//! Command router: maps every inbound update to exactly one handler.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    download::{Delivered, DownloadError, DownloadFlow, DownloadRequest},
    messaging::{port::MessagingPort, types::IncomingUpdate},
    preset::{QualityPreset, CALLBACK_PREFIX},
    session::SessionStore,
    texts, Result,
};

/// Text prefix that marks a URL submission.
pub const URL_PREFIX: &str = "http";

/// Handler chosen for an update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Start,
    HowToUse,
    About,
    SubmitUrl(String),
    SelectQuality {
        callback_id: String,
        preset: Option<QualityPreset>,
    },
    IgnoreCallback {
        callback_id: String,
    },
    Fallback,
}

/// Ordered rules, first match wins. The exact-label checks come before the
/// `http` prefix rule so the menu buttons are never treated as URLs.
pub fn classify(update: &IncomingUpdate) -> Route {
    match update {
        IncomingUpdate::Command(cmd) => match cmd.name.as_str() {
            "start" => Route::Start,
            "help" => Route::HowToUse,
            "about" => Route::About,
            _ => Route::Fallback,
        },
        IncomingUpdate::Text(msg) => {
            let text = msg.text.as_str();
            if text == texts::HOW_TO_USE_LABEL {
                Route::HowToUse
            } else if text == texts::ABOUT_LABEL {
                Route::About
            } else if text.starts_with(URL_PREFIX) {
                Route::SubmitUrl(text.trim().to_string())
            } else {
                Route::Fallback
            }
        }
        IncomingUpdate::Callback(q) if q.data.starts_with(CALLBACK_PREFIX) => {
            Route::SelectQuality {
                callback_id: q.callback_id.clone(),
                preset: QualityPreset::from_callback_data(&q.data),
            }
        }
        IncomingUpdate::Callback(q) => Route::IgnoreCallback {
            callback_id: q.callback_id.clone(),
        },
        IncomingUpdate::Other(_) => Route::Fallback,
    }
}

/// What the router did with an update.
#[derive(Debug)]
pub enum Handled {
    Replied,
    /// A download is running on its own task.
    DownloadStarted(JoinHandle<std::result::Result<Delivered, DownloadError>>),
}

/// Transport-agnostic dispatcher.
pub struct CommandRouter {
    sessions: Arc<dyn SessionStore>,
    messenger: Arc<dyn MessagingPort>,
    flow: Arc<DownloadFlow>,
}

impl CommandRouter {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messenger: Arc<dyn MessagingPort>,
        flow: Arc<DownloadFlow>,
    ) -> Self {
        Self {
            sessions,
            messenger,
            flow,
        }
    }

    pub async fn handle(&self, update: IncomingUpdate) -> Result<Handled> {
        let chat_id = update.chat_id();
        let user_id = update.user_id();
        let route = classify(&update);
        debug!(user_id = user_id.0, chat_id = chat_id.0, ?route, "routing update");

        match route {
            Route::Start => {
                self.messenger
                    .send_menu(chat_id, texts::WELCOME, &texts::main_menu())
                    .await?;
            }
            Route::HowToUse => {
                self.messenger.send_html(chat_id, texts::HOW_TO_USE).await?;
            }
            Route::About => {
                self.messenger.send_html(chat_id, texts::ABOUT).await?;
            }
            Route::SubmitUrl(url) => {
                self.sessions.put(user_id, url).await;
                self.messenger
                    .send_inline_keyboard(chat_id, texts::LINK_RECEIVED, QualityPreset::keyboard())
                    .await?;
            }
            Route::SelectQuality {
                callback_id,
                preset: Some(preset),
            } => {
                let handle = self.flow.spawn(DownloadRequest {
                    chat_id,
                    user_id,
                    callback_id,
                    preset,
                });
                return Ok(Handled::DownloadStarted(handle));
            }
            Route::SelectQuality {
                callback_id,
                preset: None,
            } => {
                self.messenger
                    .answer_callback_query(&callback_id, Some(texts::UNKNOWN_QUALITY))
                    .await?;
            }
            Route::IgnoreCallback { callback_id } => {
                self.messenger
                    .answer_callback_query(&callback_id, None)
                    .await?;
            }
            Route::Fallback => {
                self.messenger
                    .send_menu(chat_id, texts::UNSUPPORTED, &texts::main_menu())
                    .await?;
            }
        }

        Ok(Handled::Replied)
    }
}
