use crate::feed::MarketDataCache;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often to scan for quiet symbols.
    pub check_interval: Duration,
    /// A symbol with no new candle for this long gets an intraday resync.
    pub stale_after: ChronoDuration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            stale_after: ChronoDuration::seconds(65),
        }
    }
}

/// Periodic staleness sweep. Any symbol whose candle series has gone
/// quiet gets a background intraday refetch; concurrent sweeps for the
/// same symbol are coalesced by the cache.
pub async fn run_watchdog(
    cache: MarketDataCache,
    config: WatchdogConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("Watchdog stopping");
                return;
            }
        }

        let stale = cache.stale_symbols(Utc::now(), config.stale_after);
        if stale.is_empty() {
            continue;
        }

        warn!("Stale feeds detected: {:?}", stale);
        for name in &stale {
            if let Some(symbol) = cache.symbols().iter().find(|s| &s.name == name) {
                cache.spawn_resync(symbol);
            }
        }
    }
}
