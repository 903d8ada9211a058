use thiserror::Error;

/// Why a single marketplace call produced no usable answer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchFailure {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("API returned code {code} ({msg})")]
    ApiCode { code: String, msg: String },

    #[error("empty result set")]
    Empty,

    #[error("unusable price value {0:?}")]
    BadPrice(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Item lookup failed for {item:?}: {reason}")]
    Lookup { item: String, reason: FetchFailure },

    #[error("Price fetch failed for goods_id {goods_id}: {reason}")]
    PriceFetch { goods_id: String, reason: FetchFailure },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Email build error: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
}

pub type Result<T> = std::result::Result<T, AppError>;
