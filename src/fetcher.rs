use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::Config;
use crate::error::{FetchFailure, Result};
use crate::types::ItemInfo;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Status and body of one GET against the marketplace.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Outbound marketplace access. `BuffApi` in production, fakes in tests.
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<HttpReply, FetchFailure>;
}

/// reqwest-backed client with a fixed per-request timeout and browser-like headers.
pub struct BuffApi {
    client: reqwest::Client,
    base_url: String,
}

impl BuffApi {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", cfg.api_url)) {
            headers.insert(REFERER, referer);
        }

        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.api_url.clone(),
        })
    }
}

#[async_trait]
impl MarketApi for BuffApi {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<HttpReply, FetchFailure> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(transport_failure)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport_failure)?;
        debug!("GET {url} -> {status} ({} bytes)", body.len());
        Ok(HttpReply { status, body })
    }
}

fn transport_failure(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else {
        FetchFailure::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Envelope shared by the search and sell-order endpoints.
/// `data` is absent on most non-OK codes.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: Option<String>,
    msg: Option<String>,
    data: Option<ItemsPage<T>>,
}

#[derive(Debug, Deserialize)]
struct ItemsPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// One entry in a search result page.
#[derive(Debug, Clone, Deserialize)]
pub struct GoodsRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
}

/// One sell order. Only the price is used.
#[derive(Debug, Clone, Deserialize)]
pub struct SellOrder {
    #[serde(deserialize_with = "string_or_number")]
    pub price: String,
}

/// The API sends ids and prices as numbers or strings depending on endpoint.
fn string_or_number<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other}"))),
    }
}

/// Checks status, decodes the envelope and returns the non-empty item list.
fn decode_items<T>(reply: &HttpReply) -> std::result::Result<Vec<T>, FetchFailure>
where
    T: for<'de> Deserialize<'de>,
{
    if reply.status != 200 {
        return Err(FetchFailure::Status(reply.status));
    }
    let envelope: ApiEnvelope<T> =
        serde_json::from_str(&reply.body).map_err(|e| FetchFailure::Decode(e.to_string()))?;

    let code = envelope.code.unwrap_or_default();
    if code != "OK" {
        return Err(FetchFailure::ApiCode {
            code: if code.is_empty() { "missing".to_string() } else { code },
            msg: envelope.msg.unwrap_or_default(),
        });
    }

    let items = envelope.data.map(|d| d.items).unwrap_or_default();
    if items.is_empty() {
        return Err(FetchFailure::Empty);
    }
    Ok(items)
}

pub fn decode_search(reply: &HttpReply) -> std::result::Result<Vec<GoodsRecord>, FetchFailure> {
    decode_items(reply)
}

pub fn decode_sell_orders(reply: &HttpReply) -> std::result::Result<Vec<SellOrder>, FetchFailure> {
    decode_items(reply)
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Picks the first record whose name contains the item name or an alias,
/// falling back to the first record. Returns `None` only for an empty slice.
pub fn select_item<'a>(
    records: &'a [GoodsRecord],
    item_name: &str,
    aliases: &[String],
) -> Option<(&'a GoodsRecord, bool)> {
    let matches = |name: &str| {
        (!item_name.is_empty() && name.contains(item_name))
            || aliases.iter().any(|a| !a.is_empty() && name.contains(a.as_str()))
    };
    records
        .iter()
        .find(|r| matches(&r.name))
        .map(|r| (r, true))
        .or_else(|| records.first().map(|r| (r, false)))
}

impl From<&GoodsRecord> for ItemInfo {
    fn from(r: &GoodsRecord) -> Self {
        ItemInfo {
            goods_id: r.id.clone(),
            name: r.name.clone(),
            short_name: r.short_name.clone(),
        }
    }
}

/// Price of the first listing, which the marketplace orders cheapest first.
pub fn lowest_price(orders: &[SellOrder]) -> std::result::Result<f64, FetchFailure> {
    let first = orders.first().ok_or(FetchFailure::Empty)?;
    first
        .price
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p >= 0.0)
        .ok_or_else(|| FetchFailure::BadPrice(first.price.clone()))
}
