mod config;
mod error;
mod fetcher;
mod history;
mod monitor;
mod notifier;
mod types;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::fetcher::BuffApi;
use crate::monitor::PriceMonitor;
use crate::notifier::SmtpNotifier;
use crate::types::RunOutcome;

#[tokio::main]
async fn main() {
    // A missing .env is normal under cron / CI, where the environment is set directly.
    let dotenv_error = config::load_dotenv(None);

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Some(e) = dotenv_error {
        warn!("ignoring unreadable .env file: {e}");
    }

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    cfg.validate();

    let api = BuffApi::new(&cfg)?;
    let notifier = SmtpNotifier::new(&cfg);
    let monitor = PriceMonitor::new(cfg, api, notifier);

    let outcome = monitor.run().await;
    match &outcome {
        RunOutcome::FetchFailed => info!(event = "RUN_END", outcome = "fetch_failed", "run finished without a price"),
        RunOutcome::Completed { price, history_len, notify } => info!(
            event = "RUN_END",
            price = *price,
            history_len = ?history_len,
            notify = %notify,
            "run finished: {outcome}",
        ),
    }

    Ok(())
}
