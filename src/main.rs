use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tradebot::audit::TradeRecorder;
use tradebot::broker::{SharedBrokerSession, UpstoxSession};
use tradebot::config::Settings;
use tradebot::execution::{self, ExecutionConfig};
use tradebot::feed::{run_watchdog, MarketDataCache, WatchdogConfig};
use tradebot::ledger::{FileStateStore, PositionLedger};
use tradebot::orchestrator::{Orchestrator, OrchestratorConfig};
use tradebot::strategy::StrategyConfig;

const WARMUP_ATTEMPTS: u32 = 3;
const WARMUP_LOOKBACK_DAYS: i64 = 5;
const QUOTE_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> tradebot::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let capital_per_symbol = settings.allocated_capital / settings.symbols.len() as f64;
    info!(
        "Starting trading engine ({} symbols, {:.0} capital, {:.0} per symbol)",
        settings.symbols.len(),
        settings.allocated_capital,
        capital_per_symbol
    );

    let session = Arc::new(UpstoxSession::with_base_url(
        settings.access_token.clone(),
        &settings.symbols,
        settings.api_base.clone(),
    )?);
    let broker: SharedBrokerSession = session.clone();

    let recorder = Arc::new(
        TradeRecorder::new(&settings.trade_log, settings.allocated_capital)
            .map_err(|e| format!("Could not open trade log: {e}"))?,
    );
    let ledger = Arc::new(PositionLedger::load(Box::new(FileStateStore::new(
        &settings.state_file,
    ))));

    let cache = MarketDataCache::new(broker.clone(), settings.symbols.clone(), 5);

    // Warm the candle cache before anything trades. Total failure after
    // retries is fatal.
    let mut warmed = false;
    for attempt in 0..WARMUP_ATTEMPTS {
        match cache.warmup(WARMUP_LOOKBACK_DAYS).await {
            Ok(count) => {
                info!("Warmup complete: {} symbol(s) seeded", count);
                warmed = true;
                break;
            }
            Err(e) => {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                warn!("Warmup attempt {} failed: {} (retrying in {:?})", attempt + 1, e, backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    if !warmed {
        error!("Warmup failed after {} attempts, aborting", WARMUP_ATTEMPTS);
        return Err("warmup failed".into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Live quotes: poll LTP and funnel ticks into the cache.
    let instrument_keys: Vec<String> = settings
        .symbols
        .iter()
        .map(|s| s.instrument_key.clone())
        .collect();
    let mut ticks = session.clone().spawn_quote_poller(
        instrument_keys,
        QUOTE_POLL_INTERVAL,
        cache.health_handle(),
        shutdown_rx.clone(),
    );
    let tick_cache = cache.clone();
    tokio::spawn(async move {
        while let Some(tick) = ticks.recv().await {
            tick_cache.ingest_tick(&tick);
        }
    });

    tokio::spawn(run_watchdog(
        cache.clone(),
        WatchdogConfig::default(),
        shutdown_rx.clone(),
    ));

    let (queue, execution_handle) = execution::start(
        broker,
        ledger.clone(),
        recorder.clone(),
        ExecutionConfig::default(),
    );

    let mut orchestrator = Orchestrator::new(
        cache,
        ledger,
        queue,
        StrategyConfig::default(),
        OrchestratorConfig {
            capital_per_symbol,
            ..OrchestratorConfig::default()
        },
    );

    tokio::select! {
        _ = orchestrator.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    drop(orchestrator); // drops the queue sender so the worker drains and exits
    let _ = execution_handle.await;

    info!("Session realized PnL: {:.2}", recorder.total_realized_pnl());
    info!("Shutdown complete");
    Ok(())
}
