use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use tradebot::audit::TradeRecorder;
use tradebot::broker::{BrokerSession, OrderResult, OrderSide, OrderStatus, SharedBrokerSession};
use tradebot::execution::{self, ExecutionConfig};
use tradebot::feed::MarketDataCache;
use tradebot::ledger::{MemoryStateStore, PositionLedger};
use tradebot::models::{Candle, OrderAction, OrderTask, Position, Symbol, TickEvent};
use tradebot::orchestrator::{Orchestrator, OrchestratorConfig};
use tradebot::strategy::StrategyConfig;

#[derive(Clone, Copy)]
enum OrderScript {
    Fill,
    Reject,
    Fail,
}

/// Broker double with canned history and a scripted order tape.
struct ScriptedBroker {
    history: HashMap<String, Vec<Candle>>,
    orders: Mutex<Vec<(OrderSide, String, u32)>>,
    script: Mutex<VecDeque<OrderScript>>,
}

impl ScriptedBroker {
    fn new() -> Self {
        Self {
            history: HashMap::new(),
            orders: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    fn with_history(mut self, instrument_key: &str, candles: Vec<Candle>) -> Self {
        self.history.insert(instrument_key.to_string(), candles);
        self
    }

    fn with_script(self, script: &[OrderScript]) -> Self {
        *self.script.lock().unwrap() = script.iter().copied().collect();
        self
    }

    fn placed(&self) -> Vec<(OrderSide, String, u32)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerSession for ScriptedBroker {
    async fn get_history(
        &self,
        instrument_key: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> tradebot::Result<Vec<Candle>> {
        self.history
            .get(instrument_key)
            .cloned()
            .ok_or_else(|| format!("no history scripted for {instrument_key}").into())
    }

    async fn get_intraday(&self, instrument_key: &str) -> tradebot::Result<Vec<Candle>> {
        // intraday mirrors history in these tests
        self.get_history(instrument_key, NaiveDate::MIN, NaiveDate::MIN)
            .await
    }

    async fn place_market_order(
        &self,
        side: OrderSide,
        symbol: &str,
        qty: u32,
        _unique_id: &str,
    ) -> tradebot::Result<OrderResult> {
        self.orders
            .lock()
            .unwrap()
            .push((side, symbol.to_string(), qty));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OrderScript::Fill);
        match step {
            OrderScript::Fill => Ok(OrderResult {
                status: OrderStatus::Filled,
                order_id: "240603000001".to_string(),
            }),
            OrderScript::Reject => Ok(OrderResult {
                status: OrderStatus::Rejected,
                order_id: "240603000002".to_string(),
            }),
            OrderScript::Fail => Err("gateway timeout".into()),
        }
    }
}

const MARUTI_KEY: &str = "NSE_EQ|INE585B01010";

fn maruti() -> Symbol {
    Symbol::new("MARUTI", MARUTI_KEY)
}

/// Minute candles drifting choppily down, then two up bars. Against the
/// default strategy parameters this arms a long entry around 97 once the
/// tick clears the breakout level (~96.98).
fn entry_setup_candles() -> Vec<Candle> {
    let start = Utc::now() - ChronoDuration::minutes(45);
    let mut out = Vec::new();
    let mut price = 100.0;
    let mut push = |i: usize, delta: f64, price: &mut f64| {
        let open = *price;
        *price += delta;
        let close = *price;
        out.push(Candle {
            timestamp: start + ChronoDuration::minutes(i as i64),
            open,
            high: open.max(close) + 0.3,
            low: open.min(close) - 0.3,
            close,
        });
    };
    for i in 0..38 {
        push(i, if i % 2 == 0 { 0.1 } else { -0.3 }, &mut price);
    }
    push(38, 0.4, &mut price);
    push(39, 0.2, &mut price);
    out
}

fn tick(price: f64) -> TickEvent {
    TickEvent {
        instrument_key: MARUTI_KEY.to_string(),
        price,
        server_time: Utc::now(),
    }
}

fn test_recorder(dir: &tempfile::TempDir, capital: f64) -> Arc<TradeRecorder> {
    Arc::new(TradeRecorder::new(dir.path().join("trades.csv"), capital).unwrap())
}

struct Engine {
    broker: Arc<ScriptedBroker>,
    cache: MarketDataCache,
    ledger: Arc<PositionLedger>,
    recorder: Arc<TradeRecorder>,
    orchestrator: Orchestrator,
    _dir: tempfile::TempDir,
}

/// Wire a full engine around a scripted broker. Resampling runs at one
/// candle per minute so the seeded minute bars feed the strategy as-is.
fn build_engine(broker: ScriptedBroker, capital: f64) -> Engine {
    let broker = Arc::new(broker);
    let shared: SharedBrokerSession = broker.clone();

    let dir = tempfile::tempdir().unwrap();
    let recorder = test_recorder(&dir, capital);
    let ledger = Arc::new(PositionLedger::load(Box::new(MemoryStateStore::default())));
    let cache = MarketDataCache::new(shared.clone(), vec![maruti()], 5);

    let (queue, _worker) = execution::start(
        shared,
        ledger.clone(),
        recorder.clone(),
        ExecutionConfig {
            post_task_delay: Duration::ZERO,
            ..ExecutionConfig::default()
        },
    );

    let orchestrator = Orchestrator::new(
        cache.clone(),
        ledger.clone(),
        queue,
        StrategyConfig::default(),
        OrchestratorConfig {
            resample_interval: ChronoDuration::minutes(1),
            capital_per_symbol: capital,
            ..OrchestratorConfig::default()
        },
    );

    Engine {
        broker,
        cache,
        ledger,
        recorder,
        orchestrator,
        _dir: dir,
    }
}

async fn drain_worker() {
    // the worker runs on the same runtime; yield long enough for it to
    // pick up and finish the queued task
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn entry_signal_places_order_and_records_position() {
    let mut engine = build_engine(ScriptedBroker::new(), 10_000.0);

    engine.cache.merge_candles("MARUTI", entry_setup_candles());
    engine.cache.ingest_tick(&tick(97.2));
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;

    let placed = engine.broker.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].0, OrderSide::Buy);
    assert_eq!(placed[0].1, "MARUTI");
    // floor(10000 / 97.2)
    assert_eq!(placed[0].2, 102);

    assert_eq!(engine.ledger.holdings_qty("MARUTI"), 102);
    assert_eq!(engine.ledger.entry_price("MARUTI"), 97.2);
    // the lock released with the fill, so the symbol can trade again
    assert!(engine.ledger.acquire_lock("MARUTI"));
}

#[tokio::test]
async fn no_entry_without_fresh_tick() {
    let mut engine = build_engine(ScriptedBroker::new(), 10_000.0);

    engine.cache.merge_candles("MARUTI", entry_setup_candles());
    engine.cache.ingest_tick(&TickEvent {
        instrument_key: MARUTI_KEY.to_string(),
        price: 97.2,
        server_time: Utc::now() - ChronoDuration::seconds(30),
    });
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;

    assert!(engine.broker.placed().is_empty());
}

#[tokio::test]
async fn stop_hit_exits_full_position() {
    let mut engine = build_engine(ScriptedBroker::new(), 10_000.0);

    // restored position from a previous run
    engine.ledger.register_fill(
        "MARUTI",
        Position {
            qty: 10,
            order_id: "240531000009".to_string(),
            entry_price: 99.0,
            entry_time: Utc::now() - ChronoDuration::days(1),
        },
    );

    // first cycle rebuilds the trailing stop (~96.16) from candles
    engine.cache.merge_candles("MARUTI", entry_setup_candles());
    engine.cache.ingest_tick(&tick(96.6));
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;
    assert!(engine.broker.placed().is_empty());

    // tick through the stop: immediate full exit on the fast path
    engine.cache.ingest_tick(&tick(96.0));
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;

    let placed = engine.broker.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].0, OrderSide::Sell);
    assert_eq!(placed[0].2, 10);

    assert_eq!(engine.ledger.holdings_qty("MARUTI"), 0);
    // (96.0 - 99.0) * 10
    assert!((engine.recorder.total_realized_pnl() + 30.0).abs() < 1e-9);
}

#[tokio::test]
async fn duplicate_signals_coalesce_under_symbol_lock() {
    let mut engine = build_engine(ScriptedBroker::new(), 10_000.0);

    engine.cache.merge_candles("MARUTI", entry_setup_candles());
    engine.cache.ingest_tick(&tick(97.2));

    // pre-held lock simulates an order already in flight
    assert!(engine.ledger.acquire_lock("MARUTI"));
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;

    assert!(engine.broker.placed().is_empty());
    assert_eq!(engine.ledger.holdings_qty("MARUTI"), 0);
}

#[tokio::test]
async fn rejected_order_releases_lock_without_position() {
    let dir = tempfile::tempdir().unwrap();
    let broker: SharedBrokerSession =
        Arc::new(ScriptedBroker::new().with_script(&[OrderScript::Reject, OrderScript::Fail]));
    let ledger = Arc::new(PositionLedger::load(Box::new(MemoryStateStore::default())));
    let recorder = test_recorder(&dir, 10_000.0);

    let (queue, _worker) = execution::start(
        broker,
        ledger.clone(),
        recorder.clone(),
        ExecutionConfig {
            post_task_delay: Duration::ZERO,
            ..ExecutionConfig::default()
        },
    );

    for _ in 0..2 {
        assert!(ledger.acquire_lock("MARUTI"));
        assert!(queue.submit(OrderTask {
            action: OrderAction::Buy,
            symbol: "MARUTI".to_string(),
            qty: 5,
            reference_price: 100.0,
            reason: "Breakout Entry (RSI 40.5)".to_string(),
        }));
        drain_worker().await;

        // rejection and transport failure both leave the ledger flat and
        // hand the lock back
        assert_eq!(ledger.holdings_qty("MARUTI"), 0);
        assert!(!ledger.is_locked("MARUTI"));
    }

    assert_eq!(recorder.total_realized_pnl(), 0.0);
}

/// Broker double whose intraday fetches block until the test opens the
/// gate, so resync overlap is controllable.
struct GatedIntradayBroker {
    calls: AtomicUsize,
    gate: Semaphore,
    fail_next: AtomicBool,
    candles: Vec<Candle>,
}

impl GatedIntradayBroker {
    fn new(candles: Vec<Candle>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            fail_next: AtomicBool::new(false),
            candles,
        }
    }

    fn intraday_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerSession for GatedIntradayBroker {
    async fn get_history(
        &self,
        _instrument_key: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> tradebot::Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn get_intraday(&self, _instrument_key: &str) -> tradebot::Result<Vec<Candle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.map_err(|e| e.to_string())?;
        permit.forget();
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err("gateway timeout".into());
        }
        Ok(self.candles.clone())
    }

    async fn place_market_order(
        &self,
        _side: OrderSide,
        _symbol: &str,
        _qty: u32,
        _unique_id: &str,
    ) -> tradebot::Result<OrderResult> {
        Err("not expected here".into())
    }
}

#[tokio::test]
async fn resync_runs_once_in_flight_and_reschedules_after_failure() {
    let broker = Arc::new(GatedIntradayBroker::new(entry_setup_candles()));
    broker.fail_next.store(true, Ordering::SeqCst);
    let shared: SharedBrokerSession = broker.clone();
    let cache = MarketDataCache::new(shared, vec![maruti()], 5);

    // back-to-back staleness sweeps while the first fetch is in flight:
    // only one intraday request may go out
    cache.spawn_resync(&maruti());
    cache.spawn_resync(&maruti());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.intraday_calls(), 1);

    // the in-flight fetch completes with an error and merges nothing
    broker.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.intraday_calls(), 1);
    assert_eq!(cache.candle_count("MARUTI"), 0);

    // the failure released the in-flight flag: the next sweep fetches
    // again and this time the candles land
    cache.spawn_resync(&maruti());
    broker.gate.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.intraday_calls(), 2);
    assert!(cache.candle_count("MARUTI") > 0);
}

#[tokio::test]
async fn warmup_tolerates_partial_symbol_failure() {
    let candles = entry_setup_candles();
    let broker = ScriptedBroker::new()
        .with_history(MARUTI_KEY, candles.clone())
        .with_history("NSE_EQ|INE467B01029", candles);
    // third symbol has no scripted history and will fail
    let shared: SharedBrokerSession = Arc::new(broker);

    let cache = MarketDataCache::new(
        shared,
        vec![
            maruti(),
            Symbol::new("TCS", "NSE_EQ|INE467B01029"),
            Symbol::new("INFY", "NSE_EQ|INE009A01021"),
        ],
        5,
    );

    let warmed = cache.warmup(5).await.unwrap();
    assert_eq!(warmed, 2);
    assert!(cache.is_healthy());
    assert!(cache.candle_count("MARUTI") > 0);
    assert_eq!(cache.candle_count("INFY"), 0);
}

#[tokio::test]
async fn warmup_fails_when_no_symbol_seeds() {
    let shared: SharedBrokerSession = Arc::new(ScriptedBroker::new());
    let cache = MarketDataCache::new(shared, vec![maruti()], 5);

    assert!(cache.warmup(5).await.is_err());
    assert!(!cache.is_healthy());
}

#[tokio::test]
async fn entry_skipped_when_capital_below_price() {
    let mut engine = build_engine(ScriptedBroker::new(), 5.0);

    // capital too small for even one share: the entry signal fires but
    // the order is skipped, making repeated evaluation observable
    engine.cache.merge_candles("MARUTI", entry_setup_candles());
    engine.cache.ingest_tick(&tick(97.2));

    engine.orchestrator.cycle(Utc::now());
    engine.orchestrator.cycle(Utc::now());
    drain_worker().await;

    assert!(engine.broker.placed().is_empty());
    assert!(engine.ledger.acquire_lock("MARUTI"));
}
