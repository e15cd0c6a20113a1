use std::sync::Arc;

use grabtrio_core::{
    config::Config,
    session::{InMemorySessionStore, SessionStore},
};
use grabtrio_ytdlp::YtDlpClient;

#[tokio::main]
async fn main() -> Result<(), grabtrio_core::Error> {
    // `.env` may carry RUST_LOG, so it has to land before the subscriber.
    grabtrio_core::config::load_dotenv();
    grabtrio_core::logging::init("grabtrio")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            return Err(e);
        }
    };

    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let downloader = Arc::new(YtDlpClient::new(cfg.ytdlp_path.clone()));

    grabtrio_telegram::router::run(cfg, sessions, downloader)
        .await
        .map_err(|e| grabtrio_core::Error::Transport(format!("telegram bot failed: {e}")))?;

    Ok(())
}
