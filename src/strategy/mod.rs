// Signal generation. Strategies are pure per-symbol state machines: the
// orchestrator feeds them ticks and closed candles, they hand back order
// intents and keep no broker or ledger handles of their own.
pub mod rsi_chandelier;

pub use rsi_chandelier::{RsiChandelierStrategy, StrategyConfig};

use crate::models::{Candle, OrderAction};

/// An order intent produced by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub action: OrderAction,
    pub reason: String,
}

pub trait Strategy: Send {
    /// Fast path: evaluate the latest traded price against held state.
    /// Called on every fresh tick, including between candle closes.
    fn on_tick(&mut self, ltp: f64, current_qty: u32, entry_price: f64) -> Option<SignalEvent>;

    /// Slow path: evaluate a freshly closed resampled candle series.
    /// `candles` is the full resampled history, oldest first.
    fn on_candle_closed(
        &mut self,
        candles: &[Candle],
        ltp: f64,
        current_qty: u32,
        entry_price: f64,
    ) -> Option<SignalEvent>;

    /// Current trailing stop, 0.0 when flat or not yet established.
    fn trailing_stop(&self) -> f64;

    /// Latest oscillator reading, for status display.
    fn oscillator(&self) -> f64;
}
