use chrono::Local;
use tracing::{error, info, warn};

use crate::config::{Config, HISTORY_CAP, SEARCH_PATH, SELL_ORDER_PATH};
use crate::error::{AppError, FetchFailure, Result};
use crate::fetcher::{decode_search, decode_sell_orders, lowest_price, select_item, MarketApi};
use crate::history::HistoryStore;
use crate::notifier::{compose_alert, Notifier};
use crate::types::{ItemInfo, NotifyStatus, PriceObservation, RunOutcome};

/// One fetch → compare → persist → notify pass for a single item.
/// Marketplace access and alert delivery are injected.
pub struct PriceMonitor<A, N> {
    cfg: Config,
    api: A,
    notifier: N,
    history: HistoryStore,
}

impl<A: MarketApi, N: Notifier> PriceMonitor<A, N> {
    pub fn new(cfg: Config, api: A, notifier: N) -> Self {
        let history = HistoryStore::new(cfg.history_path.clone(), HISTORY_CAP);
        Self { cfg, api, notifier, history }
    }

    /// Searches the marketplace and picks the best matching item.
    pub async fn resolve_item(&self, name: &str) -> std::result::Result<ItemInfo, FetchFailure> {
        info!("[LOOKUP] searching for {name}");
        let query = [
            ("game", self.cfg.game.clone()),
            ("page_num", "1".to_string()),
            ("search", name.to_string()),
        ];
        let reply = self.api.get(SEARCH_PATH, &query).await?;
        let records = decode_search(&reply)?;

        let (record, matched) =
            select_item(&records, name, &self.cfg.item_aliases).ok_or(FetchFailure::Empty)?;
        let item = ItemInfo::from(record);
        if matched {
            info!("[LOOKUP] found {} [{}] (goods_id {})", item.name, item.short_name, item.goods_id);
        } else {
            info!(
                "[LOOKUP] no name/alias match among {} results, using first: {} (goods_id {})",
                records.len(),
                item.name,
                item.goods_id
            );
        }
        Ok(item)
    }

    /// Reads the cheapest sell order for a resolved item.
    pub async fn fetch_lowest_price(&self, goods_id: &str) -> std::result::Result<f64, FetchFailure> {
        info!("[PRICE] fetching sell orders for goods_id {goods_id}");
        let query = [
            ("game", self.cfg.game.clone()),
            ("goods_id", goods_id.to_string()),
            ("page_num", "1".to_string()),
        ];
        let reply = self.api.get(SELL_ORDER_PATH, &query).await?;
        let orders = decode_sell_orders(&reply)?;
        let price = lowest_price(&orders)?;
        info!("[PRICE] lowest listing ¥{price}");
        Ok(price)
    }

    /// Lookup then price fetch. The sell-order endpoint is not called if lookup fails.
    pub async fn get_current_price(&self) -> Result<f64> {
        let item = self
            .resolve_item(&self.cfg.item_name)
            .await
            .map_err(|reason| AppError::Lookup {
                item: self.cfg.item_name.clone(),
                reason,
            })?;

        self.fetch_lowest_price(&item.goods_id)
            .await
            .map_err(|reason| AppError::PriceFetch {
                goods_id: item.goods_id.clone(),
                reason,
            })
    }

    pub fn record_history(&self, observation: PriceObservation) -> Result<usize> {
        self.history.append(observation)
    }

    /// Sends the alert. Failures are logged and reported as `false`.
    pub async fn notify(&self, price: f64, item_name: &str) -> bool {
        let email = compose_alert(&self.cfg, price, item_name, Local::now());
        match self.notifier.send(&email).await {
            Ok(()) => {
                info!("[NOTIFY] alert sent to {} (¥{price})", self.cfg.notify_email);
                true
            }
            Err(e) => {
                error!("[NOTIFY] failed to send alert: {e}");
                false
            }
        }
    }

    /// Executes the full pipeline once. Never returns an error: every failure
    /// is logged and reflected in the outcome.
    pub async fn run(&self) -> RunOutcome {
        info!(
            "[RUN] monitoring {} — target ¥{}",
            self.cfg.item_name, self.cfg.target_price
        );

        let price = match self.get_current_price().await {
            Ok(p) => p,
            Err(e) => {
                error!("[RUN] {e} — no price, ending run");
                return RunOutcome::FetchFailed;
            }
        };
        info!("[RUN] current price ¥{price}");

        let observation = PriceObservation::new(price, &self.cfg.item_name, Local::now());
        let history_len = match self.record_history(observation) {
            Ok(len) => Some(len),
            Err(e) => {
                error!("[HISTORY] write to {} failed: {e}", self.history.path().display());
                None
            }
        };

        let notify = if price <= self.cfg.target_price {
            info!(
                "[RUN] target reached: ¥{price} <= ¥{}",
                self.cfg.target_price
            );
            if !self.cfg.notification_ready() {
                warn!("[NOTIFY] email settings incomplete, skipping alert");
                NotifyStatus::Skipped
            } else if self.notify(price, &self.cfg.item_name).await {
                NotifyStatus::Sent
            } else {
                NotifyStatus::Failed
            }
        } else {
            info!(
                "[RUN] target not reached: ¥{price} > ¥{}",
                self.cfg.target_price
            );
            NotifyStatus::NotNeeded
        };

        RunOutcome::Completed {
            price,
            history_len,
            notify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::HttpReply;
    use crate::notifier::AlertEmail;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves canned replies per path and records every path requested.
    #[derive(Default)]
    struct FakeApi {
        replies: HashMap<&'static str, HttpReply>,
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl FakeApi {
        fn with(mut self, path: &'static str, status: u16, body: &str) -> Self {
            self.replies.insert(path, HttpReply { status, body: body.to_string() });
            self
        }

        fn paths(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        fn query_of(&self, path: &str) -> Vec<(String, String)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, q)| q.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MarketApi for FakeApi {
        async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<HttpReply, FetchFailure> {
            self.calls.lock().unwrap().push((
                path.to_string(),
                query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            self.replies
                .get(path)
                .cloned()
                .ok_or_else(|| FetchFailure::Transport(format!("no route for {path}")))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<AlertEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn send(&self, email: &AlertEmail) -> Result<()> {
            if self.fail {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "relay unreachable",
                )));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    const SEARCH_OK: &str = r#"{"code":"OK","data":{"items":[
        {"id":1001,"name":"印花 | 熊","short_name":"印花"},
        {"id":42918,"name":"★ Ursus Knife | Fade","short_name":"熊刀"}
    ]}}"#;

    fn sell_orders(price: &str) -> String {
        format!(r#"{{"code":"OK","data":{{"items":[{{"price":"{price}"}},{{"price":"999"}}]}}}}"#)
    }

    fn config(dir: &TempDir, target: &str, notification: bool) -> Config {
        let history = dir.path().join("price_history.json").display().to_string();
        let target = target.to_string();
        Config::from_lookup(move |key| match key {
            "TARGET_PRICE" => Some(target.clone()),
            "HISTORY_FILE" => Some(history.clone()),
            "SMTP_USER" if notification => Some("bot@example.com".to_string()),
            "SMTP_PASSWORD" if notification => Some("secret".to_string()),
            "NOTIFY_EMAIL" if notification => Some("me@example.com".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn stored_history(dir: &TempDir) -> Vec<PriceObservation> {
        HistoryStore::new(dir.path().join("price_history.json"), HISTORY_CAP).load()
    }

    #[tokio::test]
    async fn price_below_target_records_and_notifies_once() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("350"));
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        let outcome = monitor.run().await;
        assert_eq!(
            outcome,
            RunOutcome::Completed { price: 350.0, history_len: Some(1), notify: NotifyStatus::Sent }
        );

        let history = stored_history(&dir);
        assert_eq!(history.len(), 1);
        assert!((history[0].price - 350.0).abs() < 1e-9);
        assert_eq!(history[0].item, "熊刀");
        assert_eq!(history[0].source, "Buff");

        let sent = monitor.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("350"));
        assert!(sent[0].subject.contains("熊刀"));
    }

    #[tokio::test]
    async fn price_equal_to_target_notifies() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("400.00"));
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        assert!(matches!(
            monitor.run().await,
            RunOutcome::Completed { notify: NotifyStatus::Sent, .. }
        ));
        assert_eq!(monitor.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn price_above_target_records_without_notifying() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("450"));
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        let outcome = monitor.run().await;
        assert_eq!(
            outcome,
            RunOutcome::Completed { price: 450.0, history_len: Some(1), notify: NotifyStatus::NotNeeded }
        );
        assert_eq!(stored_history(&dir).len(), 1);
        assert!(monitor.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_listing_ends_run_and_leaves_history_untouched() {
        let dir = TempDir::new().unwrap();
        let existing = vec![PriceObservation {
            timestamp: "2025-01-01T00:00:00+08:00".to_string(),
            price: 420.0,
            item: "熊刀".to_string(),
            source: "Buff".to_string(),
        }];
        let path = dir.path().join("price_history.json");
        std::fs::write(&path, serde_json::to_string_pretty(&existing).unwrap()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, r#"{"code":"OK","data":{"items":[]}}"#);
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        assert_eq!(monitor.run().await, RunOutcome::FetchFailed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert!(monitor.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_search_never_calls_sell_orders() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, r#"{"code":"OK","data":{"items":[]}}"#)
            .with(SELL_ORDER_PATH, 200, &sell_orders("350"));
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        match monitor.get_current_price().await {
            Err(AppError::Lookup { reason, .. }) => assert_eq!(reason, FetchFailure::Empty),
            other => panic!("expected Lookup failure, got {other:?}"),
        }
        assert_eq!(monitor.api.paths(), vec![SEARCH_PATH.to_string()]);

        assert_eq!(monitor.run().await, RunOutcome::FetchFailed);
        assert!(!dir.path().join("price_history.json").exists());
    }

    #[tokio::test]
    async fn search_error_status_short_circuits() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 503, "")
            .with(SELL_ORDER_PATH, 200, &sell_orders("350"));
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        assert_eq!(monitor.resolve_item("熊刀").await.unwrap_err(), FetchFailure::Status(503));
        assert_eq!(monitor.run().await, RunOutcome::FetchFailed);
        assert!(!monitor.api.paths().iter().any(|p| p == SELL_ORDER_PATH));
    }

    #[tokio::test]
    async fn resolve_prefers_alias_match_and_sends_search_query() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default().with(SEARCH_PATH, 200, SEARCH_OK);
        let monitor = PriceMonitor::new(config(&dir, "400", false), api, FakeNotifier::default());

        let item = monitor.resolve_item("熊刀").await.unwrap();
        assert_eq!(item.goods_id, "42918");
        assert_eq!(item.short_name, "熊刀");

        let query = monitor.api.query_of(SEARCH_PATH);
        assert!(query.contains(&("game".to_string(), "csgo".to_string())));
        assert!(query.contains(&("search".to_string(), "熊刀".to_string())));
    }

    #[tokio::test]
    async fn resolve_falls_back_to_first_result() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default().with(
            SEARCH_PATH,
            200,
            r#"{"code":"OK","data":{"items":[{"id":"77","name":"AK-47 | Redline","short_name":"AK"},{"id":"78","name":"AWP | Asiimov","short_name":"AWP"}]}}"#,
        );
        let monitor = PriceMonitor::new(config(&dir, "400", false), api, FakeNotifier::default());

        assert_eq!(monitor.resolve_item("熊刀").await.unwrap().goods_id, "77");
    }

    #[tokio::test]
    async fn price_fetch_uses_resolved_goods_id() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("388.8"));
        let monitor = PriceMonitor::new(config(&dir, "400", false), api, FakeNotifier::default());

        let price = monitor.get_current_price().await.unwrap();
        assert!((price - 388.8).abs() < 1e-9);
        let query = monitor.api.query_of(SELL_ORDER_PATH);
        assert!(query.contains(&("goods_id".to_string(), "42918".to_string())));
    }

    #[tokio::test]
    async fn sell_order_api_error_is_price_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, r#"{"code":"Action Forbidden","msg":"blocked"}"#);
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, FakeNotifier::default());

        match monitor.get_current_price().await {
            Err(AppError::PriceFetch { goods_id, reason }) => {
                assert_eq!(goods_id, "42918");
                assert!(matches!(reason, FetchFailure::ApiCode { .. }));
            }
            other => panic!("expected PriceFetch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn incomplete_email_settings_skip_alert_but_record_history() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("350"));
        let monitor = PriceMonitor::new(config(&dir, "400", false), api, FakeNotifier::default());

        let outcome = monitor.run().await;
        assert_eq!(
            outcome,
            RunOutcome::Completed { price: 350.0, history_len: Some(1), notify: NotifyStatus::Skipped }
        );
        assert_eq!(stored_history(&dir).len(), 1);
        assert!(monitor.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notifier_failure_does_not_abort_run() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("350"));
        let notifier = FakeNotifier { fail: true, ..Default::default() };
        let monitor = PriceMonitor::new(config(&dir, "400", true), api, notifier);

        let outcome = monitor.run().await;
        assert_eq!(
            outcome,
            RunOutcome::Completed { price: 350.0, history_len: Some(1), notify: NotifyStatus::Failed }
        );
        assert_eq!(stored_history(&dir).len(), 1);
        assert!(!monitor.notify(350.0, "熊刀").await);
    }

    #[tokio::test]
    async fn repeated_runs_append_to_history() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::default()
            .with(SEARCH_PATH, 200, SEARCH_OK)
            .with(SELL_ORDER_PATH, 200, &sell_orders("450"));
        let monitor = PriceMonitor::new(config(&dir, "400", false), api, FakeNotifier::default());

        monitor.run().await;
        monitor.run().await;
        let outcome = monitor.run().await;
        assert!(matches!(outcome, RunOutcome::Completed { history_len: Some(3), .. }));
        assert_eq!(stored_history(&dir).len(), 3);
    }
}
