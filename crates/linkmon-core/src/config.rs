use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_DB_PATH: &str = "db/links.db";
pub const DEFAULT_CHATS_FILE: &str = "config/chats.json";
pub const DEFAULT_PROXIES_FILE: &str = "config/proxies.json";
pub const DEFAULT_LOG_FILE: &str = "logs/app.log";

/// Typed runtime configuration.
///
/// Loaded from the environment (after an optional `.env`), then overridden by
/// CLI flags in the binary.
#[derive(Clone, Debug)]
pub struct Config {
    // Connection
    pub telegram_bot_token: Option<String>,

    // Files
    pub db_path: PathBuf,
    pub chats_file: PathBuf,
    pub proxies_file: PathBuf,

    // Logging
    pub log_file: Option<PathBuf>,
    pub log_level: String,

    // Pipeline
    pub workers: usize,
    pub queue_capacity: usize,
    pub insert_attempts: u32,
    pub insert_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    /// Build a config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let get_num = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        let log_file = match get("LINKMON_LOG_FILE") {
            Some(v) if matches!(v.trim().to_lowercase().as_str(), "none" | "off" | "-") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from(DEFAULT_LOG_FILE)),
        };

        Self {
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            db_path: get("LINKMON_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            chats_file: get("LINKMON_CHATS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHATS_FILE)),
            proxies_file: get("LINKMON_PROXIES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROXIES_FILE)),
            log_file,
            log_level: get("LINKMON_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            workers: get_num("LINKMON_WORKERS").unwrap_or(4).clamp(1, 64) as usize,
            queue_capacity: get_num("LINKMON_QUEUE_CAPACITY").unwrap_or(256).max(1) as usize,
            insert_attempts: get_num("LINKMON_INSERT_ATTEMPTS").unwrap_or(2).clamp(1, 10) as u32,
            insert_backoff: Duration::from_millis(
                get_num("LINKMON_INSERT_BACKOFF_MS").unwrap_or(200),
            ),
        }
    }

    /// The bot token, required only when monitoring.
    pub fn require_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN (or --bot-token) is required to monitor".to_string())
        })
    }
}

/// Load `KEY=VALUE` lines into the process env without overriding existing keys.
pub fn load_dotenv_if_present(path: &Path) {
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

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
