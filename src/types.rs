use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::config::PRICE_SOURCE;

// ---------------------------------------------------------------------------
// Item lookup
// ---------------------------------------------------------------------------

/// A marketplace item resolved from a search. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    /// Opaque identifier issued by the marketplace.
    pub goods_id: String,
    pub name: String,
    pub short_name: String,
}

// ---------------------------------------------------------------------------
// Price history
// ---------------------------------------------------------------------------

/// One line of the durable history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// ISO-8601 local time.
    pub timestamp: String,
    pub price: f64,
    /// Stored as `skin` so files written by earlier monitors stay readable.
    #[serde(rename = "skin")]
    pub item: String,
    pub source: String,
}

impl PriceObservation {
    pub fn new(price: f64, item: &str, at: DateTime<Local>) -> Self {
        Self {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, false),
            price,
            item: item.to_string(),
            source: PRICE_SOURCE.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    /// Price above target, nothing to send.
    NotNeeded,
    Sent,
    /// Target met but SMTP user/password/recipient missing.
    Skipped,
    Failed,
}

impl std::fmt::Display for NotifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotifyStatus::NotNeeded => "not_needed",
            NotifyStatus::Sent => "sent",
            NotifyStatus::Skipped => "skipped",
            NotifyStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Terminal state of one monitor run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// No price could be obtained. History and notification were not touched.
    FetchFailed,
    Completed {
        price: f64,
        /// New history length, `None` if the write failed.
        history_len: Option<usize>,
        notify: NotifyStatus,
    },
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::FetchFailed => write!(f, "fetch_failed"),
            RunOutcome::Completed { notify, .. } => write!(f, "completed (notify: {notify})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn observation_serializes_with_legacy_keys() {
        let at = Local.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        let obs = PriceObservation::new(350.5, "熊刀", at);
        let v = serde_json::to_value(&obs).unwrap();
        assert_eq!(v["skin"], "熊刀");
        assert_eq!(v["source"], "Buff");
        assert!((v["price"].as_f64().unwrap() - 350.5).abs() < 1e-9);
        assert!(v["timestamp"].as_str().unwrap().starts_with("2025-03-01T09:30:00"));
        assert!(v.get("item").is_none());
    }

    #[test]
    fn reads_entries_written_with_naive_timestamps() {
        let raw = r#"{"timestamp":"2024-11-02T10:15:30.123456","price":412.0,"skin":"熊刀","source":"Buff"}"#;
        let obs: PriceObservation = serde_json::from_str(raw).unwrap();
        assert_eq!(obs.item, "熊刀");
        assert_eq!(obs.timestamp, "2024-11-02T10:15:30.123456");
    }
}
