use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, Result};

pub const BUFF_API_URL: &str = "https://buff.163.com";
pub const SEARCH_PATH: &str = "/api/market/goods";
pub const SELL_ORDER_PATH: &str = "/api/market/goods/sell_order";

/// Label written into every history entry.
pub const PRICE_SOURCE: &str = "Buff";

/// History file keeps at most this many observations, newest last.
pub const HISTORY_CAP: usize = 100;

pub const DEFAULT_ITEM_NAME: &str = "熊刀";
pub const DEFAULT_ITEM_ALIASES: &str = "Ursus";
pub const DEFAULT_TARGET_PRICE: f64 = 400.0;
pub const DEFAULT_GAME: &str = "csgo";
pub const DEFAULT_SMTP_HOST: &str = "smtp.qq.com";

/// Implicit-TLS submission port. Any other port is driven through STARTTLS.
pub const SMTPS_PORT: u16 = 465;

/// Hard upper bound on every outbound HTTP request and the SMTP session (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct Config {
    /// Search term and primary match key (SKIN_NAME)
    pub item_name: String,
    /// Extra substrings accepted as a match in search results (ITEM_ALIASES, comma-separated)
    pub item_aliases: Vec<String>,
    /// Notify when the lowest listing is at or below this (TARGET_PRICE)
    pub target_price: f64,
    /// Category tag sent with every API request (BUFF_GAME)
    pub game: String,
    pub api_url: String,
    pub request_timeout: Duration,
    pub history_path: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    /// Sender mailbox (SMTP_FROM, falls back to SMTP_USER)
    pub smtp_from: String,
    /// Recipient of price alerts (NOTIFY_EMAIL)
    pub notify_email: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let target_price = match var("TARGET_PRICE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite() && *p >= 0.0)
                .ok_or_else(|| {
                    AppError::Config(format!("TARGET_PRICE must be a non-negative number, got {raw:?}"))
                })?,
            None => DEFAULT_TARGET_PRICE,
        };

        let smtp_port = match var("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| AppError::Config("SMTP_PORT must be a valid port number".to_string()))?,
            None => SMTPS_PORT,
        };

        let timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    AppError::Config("REQUEST_TIMEOUT_SECS must be a positive integer".to_string())
                })?,
            None => REQUEST_TIMEOUT_SECS,
        };

        let smtp_user = var("SMTP_USER").unwrap_or_default();
        let smtp_from = var("SMTP_FROM").unwrap_or_else(|| smtp_user.clone());

        Ok(Self {
            item_name: var("SKIN_NAME").unwrap_or_else(|| DEFAULT_ITEM_NAME.to_string()),
            item_aliases: var("ITEM_ALIASES")
                .unwrap_or_else(|| DEFAULT_ITEM_ALIASES.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            target_price,
            game: var("BUFF_GAME").unwrap_or_else(|| DEFAULT_GAME.to_string()),
            api_url: var("BUFF_API_URL")
                .unwrap_or_else(|| BUFF_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            request_timeout: Duration::from_secs(timeout_secs),
            history_path: var("HISTORY_FILE").unwrap_or_else(|| "price_history.json".to_string()),
            smtp_host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port,
            smtp_user,
            smtp_password: var("SMTP_PASSWORD").unwrap_or_default(),
            smtp_from,
            notify_email: var("NOTIFY_EMAIL").unwrap_or_default(),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// True when user, password and recipient are all present.
    pub fn notification_ready(&self) -> bool {
        !self.smtp_user.is_empty() && !self.smtp_password.is_empty() && !self.notify_email.is_empty()
    }

    /// Logs startup warnings for settings that silently disable features.
    pub fn validate(&self) {
        if !self.notification_ready() {
            warn!("SMTP_USER / SMTP_PASSWORD / NOTIFY_EMAIL incomplete — price alerts will not be emailed");
        }
    }

    /// Market page linked from alert emails.
    pub fn buy_url(&self) -> String {
        format!("{}/market/{}", self.api_url, self.game)
    }
}

/// Loads `.env` variables (from `path`, or the default lookup when `None`).
/// A missing file is not a problem; anything else is returned for logging.
pub fn load_dotenv(path: Option<&Path>) -> Option<dotenvy::Error> {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p),
        None => dotenvy::dotenv().map(|_| ()),
    };
    loaded.err().filter(|e| !e.not_found())
}
