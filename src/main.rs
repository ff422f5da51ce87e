mod bot;

use anyhow::Result;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{fmt, EnvFilter};

use signal_engine::config::Config;
use signal_engine::exchange::BybitClient;
use signal_engine::notify::LogNotifier;
use signal_engine::pipeline::AnalysisPipeline;
use signal_engine::storage::SqliteSignalStore;

use crate::bot::SignalBot;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    cfg.validate()?;

    let store = Arc::new(SqliteSignalStore::open(&cfg.database_path)?);
    let prices = Arc::new(BybitClient::new(&cfg));
    let pipeline = Arc::new(
        AnalysisPipeline::new(&cfg, prices, store).with_notifier(Arc::new(LogNotifier)),
    );

    let mut bot = SignalBot::new(&cfg, pipeline);
    bot.run(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
