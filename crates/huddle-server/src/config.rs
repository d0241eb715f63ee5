use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use huddle_db::StoreBackend;

/// Server settings, read from `HUDDLE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreBackend,
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub log_max_records: usize,
    pub uploads_dir: PathBuf,
    pub public_dir: Option<PathBuf>,
    pub message_ttl: Duration,
    pub sweep_interval: Duration,
    pub rate_window: Duration,
    pub rate_max: u32,
    pub max_text_len: usize,
    pub max_upload_bytes: usize,
    pub fetch_timeout: Duration,
    /// `None` allows any origin.
    pub allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("HUDDLE_PORT").or_else(|| get("PORT")) {
            Some(raw) => raw.parse().with_context(|| format!("invalid port '{raw}'"))?,
            None => 3000,
        };

        let message_ttl = Duration::from_secs(parse(&get, "HUDDLE_MESSAGE_TTL_SECS", 3 * 24 * 60 * 60)?);
        let sweep_interval = match get("HUDDLE_SWEEP_INTERVAL_SECS") {
            Some(_) => Duration::from_secs(parse(&get, "HUDDLE_SWEEP_INTERVAL_SECS", 0)?),
            None => message_ttl,
        };
        if sweep_interval.is_zero() {
            anyhow::bail!("sweep interval must be positive");
        }

        Ok(Self {
            host: get("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            store: parse(&get, "HUDDLE_STORE", StoreBackend::Sqlite)?,
            db_path: get("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into()).into(),
            log_path: get("HUDDLE_LOG_PATH")
                .unwrap_or_else(|| "messages.jsonl".into())
                .into(),
            log_max_records: parse(&get, "HUDDLE_LOG_MAX_RECORDS", 1000)?,
            uploads_dir: get("HUDDLE_UPLOADS_DIR")
                .unwrap_or_else(|| "./uploads".into())
                .into(),
            public_dir: get("HUDDLE_PUBLIC_DIR").map(PathBuf::from),
            message_ttl,
            sweep_interval,
            rate_window: Duration::from_millis(parse(&get, "HUDDLE_RATE_WINDOW_MS", 8000)?),
            rate_max: parse(&get, "HUDDLE_RATE_MAX", 5)?,
            max_text_len: parse(&get, "HUDDLE_MAX_TEXT_LEN", 5000)?,
            max_upload_bytes: parse(&get, "HUDDLE_MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            fetch_timeout: Duration::from_secs(parse(&get, "HUDDLE_FETCH_TIMEOUT_SECS", 15)?),
            allowed_origin: get("HUDDLE_ALLOWED_ORIGIN").filter(|o| o != "*"),
        })
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key} '{raw}': {e}")),
        None => Ok(default),
    }
}
