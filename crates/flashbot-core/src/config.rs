use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

use crate::{errors::Error, Result};

/// Typed configuration for the relay.
///
/// Everything comes from the environment, optionally seeded from a `.env`
/// file in the working directory (existing env always wins).
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub telegram_token: String,
    pub gemini_api_key: String,
    pub owner_chat_id: i64,

    // Webhook
    pub webhook_url: Url,
    pub port: u16,

    // Model
    pub gemini_model: String,
    pub model_timeout: Duration,

    // Tunnel (optional; when unset the operator runs the tunnel out-of-band)
    pub tunnel_command: Option<String>,
    pub tunnel_startup_timeout: Duration,

    // Files
    pub context_file: PathBuf,
    pub bot_log_path: PathBuf,
    pub tunnel_log_path: PathBuf,
    pub pid_file: PathBuf,

    // Relay behavior
    pub history_limit: usize,
    pub dedup_capacity: usize,
    pub stale_cutoff: Duration,

    // Outbox behavior
    pub reply_delay: Duration,
    pub per_chat_min_interval: Duration,
    pub outbox_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required credentials: each must be non-empty before startup.
        let telegram_token = env_str("TELEGRAM_TOKEN").unwrap_or_default();
        if telegram_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_TOKEN environment variable is required".to_string(),
            ));
        }

        let gemini_api_key = env_str("GEMINI_API_KEY").unwrap_or_default();
        if gemini_api_key.trim().is_empty() {
            return Err(Error::Config(
                "GEMINI_API_KEY environment variable is required".to_string(),
            ));
        }

        let owner_chat_id = env_str("OWNER_CHAT_ID")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                Error::Config("OWNER_CHAT_ID environment variable is required".to_string())
            })?;

        let webhook_url = env_str("WEBHOOK_URL")
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("WEBHOOK_URL environment variable is required".to_string())
            })
            .and_then(|raw| {
                Url::parse(raw.trim())
                    .map_err(|e| Error::Config(format!("WEBHOOK_URL is not a valid URL: {e}")))
            })?;

        let port = env_u16("PORT").unwrap_or(8443);

        // Model
        let gemini_model =
            env_str("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string());
        let model_timeout = Duration::from_secs(env_u64("MODEL_TIMEOUT_SECS").unwrap_or(10));

        // Tunnel
        let tunnel_command = env_str("TUNNEL_COMMAND").and_then(non_empty);
        let tunnel_startup_timeout =
            Duration::from_secs(env_u64("TUNNEL_STARTUP_TIMEOUT_SECS").unwrap_or(30));

        // Files
        let context_file = env_path("CONTEXT_FILE").unwrap_or_else(|| PathBuf::from("context.txt"));
        let bot_log_path = env_path("BOT_LOG_PATH").unwrap_or_else(|| PathBuf::from("bot.log"));
        let tunnel_log_path =
            env_path("TUNNEL_LOG_PATH").unwrap_or_else(|| PathBuf::from("tunnel.log"));
        let pid_file =
            env_path("PID_FILE").unwrap_or_else(|| PathBuf::from("/tmp/flashbot.pid"));

        // Relay behavior
        let history_limit = env_usize("HISTORY_LIMIT").unwrap_or(5);
        let dedup_capacity = env_usize("DEDUP_CAPACITY").unwrap_or(1024);
        let stale_cutoff = Duration::from_secs(env_u64("STALE_CUTOFF_SECS").unwrap_or(60));

        // Outbox behavior
        let reply_delay = Duration::from_secs(env_u64("REPLY_DELAY_SECS").unwrap_or(2));
        let per_chat_min_interval =
            Duration::from_secs(env_u64("MIN_MESSAGE_INTERVAL_SECS").unwrap_or(10));
        let outbox_capacity = env_usize("MAX_QUEUE_SIZE").unwrap_or(10);

        Ok(Self {
            telegram_token,
            gemini_api_key,
            owner_chat_id,
            webhook_url,
            port,
            gemini_model,
            model_timeout,
            tunnel_command,
            tunnel_startup_timeout,
            context_file,
            bot_log_path,
            tunnel_log_path,
            pid_file,
            history_limit,
            dedup_capacity,
            stale_cutoff,
            reply_delay,
            per_chat_min_interval,
            outbox_capacity,
        })
    }
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

/// Parse `.env` contents into key/value pairs.
///
/// Blank lines and `#` comments are skipped; values may carry one pair of
/// surrounding quotes.
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

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
