//! User-facing copy (Telegram HTML).

use crate::{
    formatting::{escape_html, truncate_text},
    messaging::types::ReplyKeyboard,
};

pub const HOW_TO_USE_LABEL: &str = "📥 How to use";
pub const ABOUT_LABEL: &str = "ℹ️ About bot";

pub const WELCOME: &str = "👋 <b>Welcome to GrabTrio Video Downloader!</b>\n\n\
🚀 I can instantly download videos from:\n\
• YouTube (Videos, Shorts)\n\
• Instagram (Reels, Posts)\n\
• Facebook (Reels, Videos)\n\n\
Just send any video link and choose the quality.\n\n\
👨‍💻 <b>Developer</b>: Sk Naimuddin";

pub const HOW_TO_USE: &str = "📥 <b>How to use GrabTrio Bot</b>\n\n\
1️⃣ Copy any public video link.\n\
2️⃣ Paste the link here.\n\
3️⃣ Choose Best / 720p / 1080p.\n\
4️⃣ Wait for download.\n\n\
⚠ 1080p may exceed Telegram limits.";

pub const ABOUT: &str = "ℹ️ <b>GrabTrio Bot</b>\n\
Created by <b>Sk Naimuddin</b>.\n\
Powered by yt-dlp.";

pub const UNSUPPORTED: &str =
    "🤔 I only understand video links.\nSend a link starting with <code>http</code> or use the menu below.";

pub const LINK_RECEIVED: &str = "🔗 Link received!\nSelect your preferred quality:";

pub const NO_URL_FOUND: &str = "No URL found. Send the link again.";
pub const UNKNOWN_QUALITY: &str = "Unknown quality option.";

pub const DOWNLOAD_COMPLETE: &str = "✅ Download complete!";

const ERROR_DETAIL_MAX_CHARS: usize = 800;

/// The two quick-reply buttons shown under the input field.
pub fn main_menu() -> ReplyKeyboard {
    ReplyKeyboard {
        rows: vec![vec![HOW_TO_USE_LABEL.to_string(), ABOUT_LABEL.to_string()]],
        resize: true,
    }
}

/// Callback toast shown when a download starts.
pub fn downloading_toast(label: &str) -> String {
    format!("Downloading {label}…")
}

/// Status message kept and edited for the lifetime of one download.
pub fn downloading_status(label: &str) -> String {
    format!("⬇️ Downloading video ({})…", escape_html(label))
}

pub fn download_error(detail: &str) -> String {
    format!(
        "❌ Download error:\n<code>{}</code>",
        escape_html(&truncate_text(detail, ERROR_DETAIL_MAX_CHARS))
    )
}
