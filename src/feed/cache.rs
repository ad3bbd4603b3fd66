use crate::broker::SharedBrokerSession;
use crate::feed::resample::resample_candles;
use crate::models::{Candle, Symbol, TickEvent};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Hard cap on buffered 1-minute candles per symbol.
const MAX_CANDLES: usize = 5000;

#[derive(Debug, Default, Clone)]
struct MarketState {
    candles: Vec<Candle>,
    ltp: f64,
    last_tick_time: Option<DateTime<Utc>>,
    last_candle_time: Option<DateTime<Utc>>,
}

/// Shared in-memory market data store.
///
/// Holds per-symbol 1-minute candle history plus the latest traded price.
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct MarketDataCache {
    broker: SharedBrokerSession,
    symbols: Arc<Vec<Symbol>>,
    key_to_name: Arc<HashMap<String, String>>,
    inner: Arc<RwLock<HashMap<String, MarketState>>>,
    healthy: Arc<AtomicBool>,
    resyncing: Arc<Mutex<HashSet<String>>>,
    resync_permits: Arc<Semaphore>,
}

impl MarketDataCache {
    pub fn new(broker: SharedBrokerSession, symbols: Vec<Symbol>, max_concurrent_resyncs: usize) -> Self {
        let key_to_name = symbols
            .iter()
            .map(|s| (s.instrument_key.clone(), s.name.clone()))
            .collect();
        let inner = symbols
            .iter()
            .map(|s| (s.name.clone(), MarketState::default()))
            .collect();

        Self {
            broker,
            symbols: Arc::new(symbols),
            key_to_name: Arc::new(key_to_name),
            inner: Arc::new(RwLock::new(inner)),
            healthy: Arc::new(AtomicBool::new(false)),
            resyncing: Arc::new(Mutex::new(HashSet::new())),
            resync_permits: Arc::new(Semaphore::new(max_concurrent_resyncs)),
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Seed every symbol with recent daily history plus today's intraday
    /// candles. Returns the number of symbols successfully warmed; an error
    /// means no symbol could be seeded at all.
    pub async fn warmup(&self, lookback_days: i64) -> crate::Result<usize> {
        let to = Utc::now().date_naive();
        let from = to - ChronoDuration::days(lookback_days);
        let mut warmed = 0usize;

        for symbol in self.symbols.iter() {
            let mut candles = match self.broker.get_history(&symbol.instrument_key, from, to).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Warmup history fetch failed for {}: {}", symbol.name, e);
                    continue;
                }
            };

            match self.broker.get_intraday(&symbol.instrument_key).await {
                Ok(mut intraday) => candles.append(&mut intraday),
                Err(e) => warn!("Warmup intraday fetch failed for {}: {}", symbol.name, e),
            }

            if candles.is_empty() {
                warn!("Warmup produced no candles for {}", symbol.name);
                continue;
            }

            let count = self.merge_candles(&symbol.name, candles);
            info!("Warmed up {} with {} candles", symbol.name, count);
            warmed += 1;
        }

        if warmed == 0 {
            return Err("Warmup failed for every symbol".into());
        }

        self.healthy.store(true, Ordering::SeqCst);
        Ok(warmed)
    }

    /// Merge a batch of candles into a symbol's buffer. Duplicate
    /// timestamps resolve in favour of the incoming batch, the buffer is
    /// capped at `MAX_CANDLES` newest entries, and the candle-time
    /// watermark never moves backwards. Returns the resulting buffer size.
    pub fn merge_candles(&self, symbol: &str, new_candles: Vec<Candle>) -> usize {
        let mut guard = self.inner.write().unwrap();
        let Some(state) = guard.get_mut(symbol) else {
            warn!("Dropping candles for unknown symbol {}", symbol);
            return 0;
        };

        state.candles.extend(new_candles);
        // Stable sort keeps arrival order within a timestamp so the
        // keep-last dedup below prefers the freshest data.
        state.candles.sort_by_key(|c| c.timestamp);
        dedup_keep_last(&mut state.candles);

        if state.candles.len() > MAX_CANDLES {
            let excess = state.candles.len() - MAX_CANDLES;
            state.candles.drain(..excess);
        }

        if let Some(last) = state.candles.last() {
            let watermark = state.last_candle_time.get_or_insert(last.timestamp);
            if last.timestamp > *watermark {
                *watermark = last.timestamp;
            }
        }

        state.candles.len()
    }

    /// Record a live tick. Unknown instruments are ignored. Restores the
    /// feed health flag cleared by a failed poll.
    pub fn ingest_tick(&self, tick: &TickEvent) {
        let Some(name) = self.key_to_name.get(&tick.instrument_key) else {
            return;
        };

        let mut guard = self.inner.write().unwrap();
        if let Some(state) = guard.get_mut(name) {
            state.ltp = tick.price;
            state.last_tick_time = Some(tick.server_time);
        }
        drop(guard);

        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        let guard = self.inner.read().unwrap();
        guard.get(symbol).filter(|s| s.ltp > 0.0).map(|s| s.ltp)
    }

    pub fn last_tick_time(&self, symbol: &str) -> Option<DateTime<Utc>> {
        let guard = self.inner.read().unwrap();
        guard.get(symbol).and_then(|s| s.last_tick_time)
    }

    pub fn last_candle_time(&self, symbol: &str) -> Option<DateTime<Utc>> {
        let guard = self.inner.read().unwrap();
        guard.get(symbol).and_then(|s| s.last_candle_time)
    }

    /// Resampled view of a symbol's buffer. `None` when the symbol is
    /// unknown or has no complete buckets yet.
    pub fn resample(&self, symbol: &str, interval: ChronoDuration) -> Option<Vec<Candle>> {
        let guard = self.inner.read().unwrap();
        let state = guard.get(symbol)?;
        let resampled = resample_candles(&state.candles, interval);
        if resampled.is_empty() {
            None
        } else {
            Some(resampled)
        }
    }

    pub fn candle_count(&self, symbol: &str) -> usize {
        let guard = self.inner.read().unwrap();
        guard.get(symbol).map(|s| s.candles.len()).unwrap_or(0)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Handle for producers (the quote poller) to clear the health flag
    /// when their upstream fails.
    pub fn health_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    /// Symbols whose candle series has gone quiet. Candles only arrive
    /// through warmup and resync, so an aging watermark is the signal to
    /// refetch intraday data. Symbols that never seeded have nothing to
    /// resync and are skipped.
    pub fn stale_symbols(&self, now: DateTime<Utc>, stale_after: ChronoDuration) -> Vec<String> {
        let guard = self.inner.read().unwrap();
        guard
            .iter()
            .filter_map(|(name, state)| {
                let last_seen = state.last_candle_time?;
                if now - last_seen > stale_after {
                    Some(name.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Claim the resync slot for a symbol. Returns false if a resync is
    /// already in flight, so callers coalesce instead of stacking fetches.
    pub fn begin_resync(&self, symbol: &str) -> bool {
        self.resyncing.lock().unwrap().insert(symbol.to_string())
    }

    pub fn finish_resync(&self, symbol: &str) {
        self.resyncing.lock().unwrap().remove(symbol);
    }

    /// Kick off a background intraday refetch for a stale symbol. No-op if
    /// one is already running for it.
    pub fn spawn_resync(&self, symbol: &Symbol) {
        if !self.begin_resync(&symbol.name) {
            return;
        }

        let cache = self.clone();
        let symbol = symbol.clone();
        tokio::spawn(async move {
            let _permit = match cache.resync_permits.acquire().await {
                Ok(p) => p,
                Err(_) => {
                    cache.finish_resync(&symbol.name);
                    return;
                }
            };

            match cache.broker.get_intraday(&symbol.instrument_key).await {
                Ok(candles) if !candles.is_empty() => {
                    let count = cache.merge_candles(&symbol.name, candles);
                    info!("Resynced {} ({} candles buffered)", symbol.name, count);
                }
                Ok(_) => warn!("Resync returned no candles for {}", symbol.name),
                Err(e) => warn!("Resync failed for {}: {}", symbol.name, e),
            }

            cache.finish_resync(&symbol.name);
        });
    }
}

/// Drop duplicate-timestamp candles, keeping the last occurrence.
fn dedup_keep_last(candles: &mut Vec<Candle>) {
    if candles.len() < 2 {
        return;
    }
    let mut write = 0usize;
    for read in 0..candles.len() {
        let is_last_of_run =
            read + 1 == candles.len() || candles[read + 1].timestamp != candles[read].timestamp;
        if is_last_of_run {
            candles.swap(write, read);
            write += 1;
        }
    }
    candles.truncate(write);
}
