use crate::execution::ExecutionQueue;
use crate::feed::MarketDataCache;
use crate::ledger::PositionLedger;
use crate::models::{OrderAction, OrderTask, Symbol};
use crate::strategy::{RsiChandelierStrategy, SignalEvent, Strategy, StrategyConfig};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cycle_interval: Duration,
    /// A symbol is only evaluated when its last tick is this fresh.
    pub tick_freshness: ChronoDuration,
    pub resample_interval: ChronoDuration,
    /// Notional budget per entry; buy quantity is this over the price.
    pub capital_per_symbol: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(500),
            tick_freshness: ChronoDuration::seconds(10),
            resample_interval: ChronoDuration::minutes(3),
            capital_per_symbol: 100_000.0,
        }
    }
}

/// Drives the trading loop: polls the cache, runs each symbol's strategy
/// and hands accepted signals to the execution queue under the symbol's
/// order lock.
pub struct Orchestrator {
    cache: MarketDataCache,
    ledger: Arc<PositionLedger>,
    queue: ExecutionQueue,
    strategies: HashMap<String, RsiChandelierStrategy>,
    // last resampled bucket evaluated per symbol; the candle path only
    // runs when this advances
    last_candle_seen: HashMap<String, DateTime<Utc>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        cache: MarketDataCache,
        ledger: Arc<PositionLedger>,
        queue: ExecutionQueue,
        strategy_config: StrategyConfig,
        config: OrchestratorConfig,
    ) -> Self {
        let strategies = cache
            .symbols()
            .iter()
            .map(|s| (s.name.clone(), RsiChandelierStrategy::new(strategy_config.clone())))
            .collect();

        Self {
            cache,
            ledger,
            queue,
            strategies,
            last_candle_seen: HashMap::new(),
            config,
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cycles: u64 = 0;

        info!("Orchestrator running ({} symbols)", self.strategies.len());
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("Orchestrator stopping");
                    return;
                }
            }

            if !self.cache.is_healthy() {
                debug!("Feed unhealthy, holding evaluation");
                continue;
            }

            self.cycle(Utc::now());

            cycles += 1;
            if cycles % 120 == 0 {
                self.log_status();
            }
        }
    }

    /// One evaluation pass over every symbol. Synchronous by design so
    /// tests can drive it with a fixed clock.
    pub fn cycle(&mut self, now: DateTime<Utc>) {
        let symbols: Vec<Symbol> = self.cache.symbols().to_vec();

        for symbol in &symbols {
            let name = &symbol.name;

            let fresh = self
                .cache
                .last_tick_time(name)
                .map(|t| now - t <= self.config.tick_freshness)
                .unwrap_or(false);
            if !fresh {
                continue;
            }
            let Some(ltp) = self.cache.last_price(name) else {
                continue;
            };

            let qty = self.ledger.holdings_qty(name);
            let entry = self.ledger.entry_price(name);
            let Some(strategy) = self.strategies.get_mut(name) else {
                continue;
            };

            // Fast path: stop checks run on every fresh tick.
            if let Some(signal) = strategy.on_tick(ltp, qty, entry) {
                Self::enqueue(&self.ledger, &self.queue, name, signal, qty, ltp);
                continue;
            }

            // Slow path: only when a new resampled bucket has closed.
            let Some(candles) = self.cache.resample(name, self.config.resample_interval) else {
                continue;
            };
            let last_bucket = candles.last().map(|c| c.timestamp);
            if last_bucket.is_none() || self.last_candle_seen.get(name).copied() == last_bucket {
                continue;
            }
            self.last_candle_seen.insert(name.clone(), last_bucket.unwrap_or(now));

            if let Some(signal) = strategy.on_candle_closed(&candles, ltp, qty, entry) {
                let order_qty = match signal.action {
                    OrderAction::Buy => {
                        let q = (self.config.capital_per_symbol / ltp).floor();
                        if q < 1.0 {
                            warn!("Skipping {} entry: price {:.2} exceeds allocation", name, ltp);
                            continue;
                        }
                        q as u32
                    }
                    OrderAction::Sell => qty,
                };
                Self::enqueue(&self.ledger, &self.queue, name, signal, order_qty, ltp);
            }
        }
    }

    fn enqueue(
        ledger: &PositionLedger,
        queue: &ExecutionQueue,
        symbol: &str,
        signal: SignalEvent,
        qty: u32,
        ltp: f64,
    ) {
        if qty == 0 {
            return;
        }
        // Lock first: a held lock means an order is already in flight and
        // this signal is dropped, not queued behind it.
        if !ledger.acquire_lock(symbol) {
            debug!("Signal for {} dropped, order in flight", symbol);
            return;
        }

        let accepted = queue.submit(OrderTask {
            action: signal.action,
            symbol: symbol.to_string(),
            qty,
            reference_price: ltp,
            reason: signal.reason,
        });
        if !accepted {
            warn!("Execution queue closed, dropping signal for {}", symbol);
            ledger.release_lock(symbol);
        }
    }

    fn log_status(&self) {
        for (name, strategy) in &self.strategies {
            let qty = self.ledger.holdings_qty(name);
            if qty > 0 {
                let exposure = f64::from(qty) * self.cache.last_price(name).unwrap_or(0.0);
                info!(
                    "{}: qty {} | exposure {:.2} | stop {:.2} | rsi {:.1}",
                    name,
                    qty,
                    exposure,
                    strategy.trailing_stop(),
                    strategy.oscillator()
                );
            } else {
                debug!("{}: flat | rsi {:.1}", name, strategy.oscillator());
            }
        }
    }
}
