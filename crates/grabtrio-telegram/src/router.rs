//! Update delivery: long polling or webhook push, both feeding the same handlers.

use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    update_listeners::webhooks::{self, Options},
};
use tracing::{info, warn};

use grabtrio_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use grabtrio_core::{
    config::Config,
    download::{DownloadFlow, Downloader, FlowSettings},
    messaging::port::MessagingPort,
    router::CommandRouter,
    session::SessionStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub messenger: Arc<dyn MessagingPort>,
    pub router: Arc<CommandRouter>,
}

/// How updates reach the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Polling,
    Webhook { url: url::Url },
}

impl Delivery {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        match &cfg.webhook_url {
            None => Ok(Delivery::Polling),
            Some(raw) => {
                let url = url::Url::parse(raw)
                    .map_err(|e| anyhow::anyhow!("WEBHOOK_URL is not a valid URL ({raw}): {e}"))?;
                if url.scheme() != "https" {
                    warn!(%url, "Telegram only delivers webhooks over https");
                }
                Ok(Delivery::Webhook { url })
            }
        }
    }
}

/// Wire the core services to Telegram and run until shutdown.
pub async fn run(
    cfg: Arc<Config>,
    sessions: Arc<dyn SessionStore>,
    downloader: Arc<dyn Downloader>,
) -> anyhow::Result<()> {
    let delivery = Delivery::from_config(&cfg)?;
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => return Err(anyhow::anyhow!("telegram getMe failed: {e}")),
    }
    info!(temp_dir = %cfg.temp_dir.display(), ytdlp = %cfg.ytdlp_path.display(), "download settings");

    // Throttle outbound calls to stay under Telegram flood limits. The adapter
    // still retries a single 429 RetryAfter on its own.
    let raw_messenger = TelegramMessenger::new(bot.clone());
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        Arc::new(raw_messenger.clone()),
        ThrottleConfig::default(),
    ));

    let flow = Arc::new(DownloadFlow::new(
        sessions.clone(),
        downloader,
        messenger.clone(),
        FlowSettings::from(cfg.as_ref()),
    ));
    let router = Arc::new(CommandRouter::new(sessions, messenger.clone(), flow));

    let state = Arc::new(AppState {
        messenger,
        router,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(raw_messenger.bot(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    match delivery {
        Delivery::Polling => {
            if let Err(e) = bot.delete_webhook().await {
                warn!(error = %e, "failed to delete webhook (continuing with polling)");
            }
            info!("receiving updates via long polling");
            dispatcher.dispatch().await;
        }
        Delivery::Webhook { url } => {
            let mut options = Options::new(cfg.listen_addr(), url.clone());
            if let Some(secret) = &cfg.webhook_secret {
                options = options.secret_token(secret.clone());
            }
            let listener = webhooks::axum(bot, options)
                .await
                .map_err(|e| anyhow::anyhow!("failed to set up webhook: {e}"))?;
            info!(%url, addr = %cfg.listen_addr(), "receiving updates via webhook");
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("webhook listener error"),
                )
                .await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_defaults_to_polling() {
        let cfg = Config::for_temp_dir("/tmp");
        assert_eq!(Delivery::from_config(&cfg).unwrap(), Delivery::Polling);
    }

    #[test]
    fn delivery_uses_webhook_when_url_is_set() {
        let mut cfg = Config::for_temp_dir("/tmp");
        cfg.webhook_url = Some("https://bot.example.com/webhook".to_string());
        let Delivery::Webhook { url } = Delivery::from_config(&cfg).unwrap() else {
            panic!("expected webhook delivery");
        };
        assert_eq!(url.path(), "/webhook");
    }

    #[test]
    fn invalid_webhook_url_is_rejected() {
        let mut cfg = Config::for_temp_dir("/tmp");
        cfg.webhook_url = Some("not a url".to_string());
        assert!(Delivery::from_config(&cfg).is_err());
    }
}
