use std::{
    env, fs,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_MB: u64 = 50;
const WEBHOOK_SECRET_MAX_LEN: usize = 256;

/// Typed process configuration, read from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub port: u16,

    // yt-dlp
    pub ytdlp_path: PathBuf,
    pub ytdlp_cookies: Option<PathBuf>,
    pub download_timeout: Option<Duration>,

    // Files
    pub temp_dir: PathBuf,
    /// Zero disables the check.
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv();

        let telegram_bot_token = env_str("BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("BOT_TOKEN environment variable is required".to_string())
            })?;

        let webhook_url = env_str("WEBHOOK_URL").and_then(non_empty);
        let webhook_secret = env_str("WEBHOOK_SECRET")
            .and_then(non_empty)
            .map(|s| validate_webhook_secret(&s).map(|()| s))
            .transpose()?;
        let port = match env_str("PORT").and_then(non_empty) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {raw}")))?,
            None => DEFAULT_PORT,
        };

        let ytdlp_path = env_path("YTDLP_PATH")
            .or_else(|| which_in_path("yt-dlp"))
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/yt-dlp"));
        let ytdlp_cookies = env_path("YTDLP_COOKIES");
        if let Some(p) = &ytdlp_cookies {
            if !p.is_file() {
                return Err(Error::InvalidPath {
                    path: p.clone(),
                    reason: "YTDLP_COOKIES does not point to a file".to_string(),
                });
            }
        }
        let download_timeout = env_u64("DOWNLOAD_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let temp_dir = env_path("TEMP_DIR").unwrap_or_else(|| env::temp_dir().join("grabtrio"));
        fs::create_dir_all(&temp_dir)?;

        let max_upload_bytes =
            megabytes_to_bytes(env_u64("MAX_UPLOAD_MB")?.unwrap_or(DEFAULT_MAX_UPLOAD_MB))?;

        Ok(Self {
            telegram_bot_token,
            webhook_url,
            webhook_secret,
            port,
            ytdlp_path,
            ytdlp_cookies,
            download_timeout,
            temp_dir,
            max_upload_bytes,
        })
    }

    /// Address the webhook listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Minimal config for tests and embedding.
    pub fn for_temp_dir(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            telegram_bot_token: String::new(),
            webhook_url: None,
            webhook_secret: None,
            port: DEFAULT_PORT,
            ytdlp_path: PathBuf::from("yt-dlp"),
            ytdlp_cookies: None,
            download_timeout: None,
            temp_dir: temp_dir.into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Load `./.env` into the process environment without overriding existing
/// variables. `Config::load` calls this too; run it earlier when other setup
/// (logging filters) should see the file.
pub fn load_dotenv() {
    load_dotenv_if_present(Path::new(".env"));
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    env_str(key)
        .and_then(non_empty)
        .map(|raw| parse_u64(key, &raw))
        .transpose()
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{key} is not a non-negative integer: {raw}")))
}

fn megabytes_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| Error::Config(format!("MAX_UPLOAD_MB is too large: {mb}")))
}

/// Telegram accepts 1-256 characters from `A-Z`, `a-z`, `0-9`, `_` and `-`.
fn validate_webhook_secret(secret: &str) -> Result<()> {
    let valid = !secret.is_empty()
        && secret.len() <= WEBHOOK_SECRET_MAX_LEN
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "WEBHOOK_SECRET must be 1-{WEBHOOK_SECRET_MAX_LEN} characters from A-Z, a-z, 0-9, '_' and '-'"
        )))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).and_then(non_empty).map(PathBuf::from)
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
