use super::{SignalEvent, Strategy};
use crate::indicators::{atr_series, chandelier_series, composite_rsi_series};
use crate::models::{Candle, OrderAction};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub rsi_short: usize,
    pub rsi_long: usize,
    pub atr_period: usize,
    /// Chandelier multiplier while the oscillator is in normal range.
    pub mult_standard: f64,
    /// Tightened multiplier once the oscillator is overbought.
    pub mult_tight: f64,
    pub overbought: f64,
    /// Entries only fire below this oscillator level.
    pub entry_rsi_max: f64,
    /// Profit in ATRs before the stop snaps to breakeven.
    pub breakeven_trigger_atr: f64,
    /// Minimum resampled candles before any signal is considered.
    pub min_candles: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_short: 9,
            rsi_long: 15,
            atr_period: 22,
            mult_standard: 3.0,
            mult_tight: 1.0,
            overbought: 70.0,
            entry_rsi_max: 50.0,
            breakeven_trigger_atr: 1.5,
            min_candles: 30,
        }
    }
}

/// Long-only momentum strategy: enter on an oscillator upturn through a
/// chandelier breakout level, then ride a ratcheting chandelier trailing
/// stop that tightens when overbought and snaps to breakeven once the
/// trade is comfortably in profit.
///
/// The trailing stop is runtime state. After a restart it is rebuilt on
/// the first candle evaluation for any restored position.
pub struct RsiChandelierStrategy {
    config: StrategyConfig,
    trailing_stop: f64,
    current_rsi: f64,
}

impl RsiChandelierStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self {
            config,
            trailing_stop: 0.0,
            current_rsi: 0.0,
        }
    }

    /// Latest chandelier channel value for the given multiplier.
    fn channel(&self, candles: &[Candle], multiplier: f64) -> Option<f64> {
        chandelier_series(candles, self.config.atr_period, multiplier)
            .last()
            .copied()
            .flatten()
    }
}

impl Strategy for RsiChandelierStrategy {
    fn on_tick(&mut self, ltp: f64, current_qty: u32, _entry_price: f64) -> Option<SignalEvent> {
        if current_qty > 0 && self.trailing_stop > 0.0 && ltp <= self.trailing_stop {
            return Some(SignalEvent {
                action: OrderAction::Sell,
                reason: format!("Stop Hit {:.2}", self.trailing_stop),
            });
        }
        None
    }

    fn on_candle_closed(
        &mut self,
        candles: &[Candle],
        ltp: f64,
        current_qty: u32,
        entry_price: f64,
    ) -> Option<SignalEvent> {
        if candles.len() < self.config.min_candles {
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi = composite_rsi_series(&closes, self.config.rsi_short, self.config.rsi_long);
        let atr = atr_series(candles, self.config.atr_period);

        let prev = rsi
            .len()
            .checked_sub(2)
            .and_then(|i| rsi.get(i).copied().flatten());
        let (curr_rsi, prev_rsi, curr_atr) =
            match (rsi.last().copied().flatten(), prev, atr.last().copied().flatten()) {
                (Some(c), Some(p), Some(a)) => (c, p, a),
                _ => return None,
            };
        self.current_rsi = curr_rsi;

        if current_qty > 0 {
            let mult = if curr_rsi > self.config.overbought {
                self.config.mult_tight
            } else {
                self.config.mult_standard
            };
            let dynamic_stop = self.channel(candles, mult)?;

            // Breakeven snap is checked against the stop as it stood
            // before this candle's trail update.
            if self.trailing_stop < entry_price
                && ltp - entry_price > curr_atr * self.config.breakeven_trigger_atr
            {
                debug!("Stop moved to breakeven at {:.2}", entry_price);
                self.trailing_stop = entry_price;
            }
            if dynamic_stop > self.trailing_stop {
                self.trailing_stop = dynamic_stop;
            }
            return None;
        }

        // Flat: no stale stop may linger into the next entry.
        self.trailing_stop = 0.0;

        let entry_chand = self.channel(candles, self.config.mult_standard)?;
        let rising = curr_rsi > prev_rsi;
        if curr_rsi < self.config.entry_rsi_max && rising && ltp > entry_chand + curr_atr {
            self.trailing_stop = entry_chand;
            return Some(SignalEvent {
                action: OrderAction::Buy,
                reason: format!("Breakout Entry (RSI {:.1})", curr_rsi),
            });
        }

        None
    }

    fn trailing_stop(&self) -> f64 {
        self.trailing_stop
    }

    fn oscillator(&self) -> f64 {
        self.current_rsi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn to_candles(bars: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap();
        bars.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: start + Duration::minutes(3 * i as i64),
                open,
                high,
                low,
                close,
            })
            .collect()
    }

    /// Choppy drift down, then two up bars: oscillator below 50 and
    /// rising, price above the breakout level.
    fn entry_setup() -> Vec<Candle> {
        let mut bars = Vec::new();
        let mut price: f64 = 100.0;
        for i in 0..38 {
            let delta = if i % 2 == 0 { 0.1 } else { -0.3 };
            let open = price;
            price += delta;
            let close = price;
            bars.push((open, open.max(close) + 0.3, open.min(close) - 0.3, close));
        }
        for delta in [0.4, 0.2] {
            let open = price;
            price += delta;
            let close = price;
            bars.push((open, open.max(close) + 0.3, open.min(close) - 0.3, close));
        }
        to_candles(&bars)
    }

    /// Strong uptrend that pushes the oscillator deep into overbought.
    fn overbought_setup() -> Vec<Candle> {
        let mut bars = Vec::new();
        let mut price: f64 = 100.0;
        for i in 0..40 {
            let delta = if i % 4 != 3 { 0.6 } else { -0.1 };
            let open = price;
            price += delta;
            let close = price;
            bars.push((open, open.max(close) + 0.2, open.min(close) - 0.2, close));
        }
        to_candles(&bars)
    }

    #[test]
    fn test_single_candle_with_tiny_minimum() {
        // min_candles below the indicator windows must degrade to "no
        // signal", not underflow while reaching for the previous reading
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig {
            min_candles: 1,
            ..StrategyConfig::default()
        });
        let candles = to_candles(&[(100.0, 101.0, 99.0, 100.5)]);
        assert!(strategy.on_candle_closed(&candles, 100.5, 0, 0.0).is_none());
        assert!(strategy.on_candle_closed(&candles, 100.5, 10, 99.0).is_none());
    }

    #[test]
    fn test_no_signal_with_short_history() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = to_candles(&[(100.0, 101.0, 99.0, 100.5); 20]);
        assert!(strategy.on_candle_closed(&candles, 100.5, 0, 0.0).is_none());
    }

    #[test]
    fn test_entry_fires_and_initializes_stop() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = entry_setup();

        let signal = strategy.on_candle_closed(&candles, 97.2, 0, 0.0).unwrap();
        assert_eq!(signal.action, OrderAction::Buy);
        // stop seeds at the standard chandelier level
        assert!((strategy.trailing_stop() - 96.1644).abs() < 1e-3);
        assert!(strategy.oscillator() < 50.0);
    }

    #[test]
    fn test_no_entry_when_price_below_breakout() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = entry_setup();

        // oscillator conditions hold but the tick sits under level + ATR
        assert!(strategy.on_candle_closed(&candles, 96.9, 0, 0.0).is_none());
        assert_eq!(strategy.trailing_stop(), 0.0);
    }

    #[test]
    fn test_no_entry_when_overbought() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = overbought_setup();

        // oscillator far above the entry ceiling
        assert!(strategy.on_candle_closed(&candles, 200.0, 0, 0.0).is_none());
        assert!(strategy.oscillator() > 70.0);
    }

    #[test]
    fn test_tick_exit_at_or_below_stop() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        strategy.trailing_stop = 100.0;

        assert!(strategy.on_tick(100.5, 10, 99.0).is_none());

        let signal = strategy.on_tick(100.0, 10, 99.0).unwrap();
        assert_eq!(signal.action, OrderAction::Sell);
        assert_eq!(signal.reason, "Stop Hit 100.00");
    }

    #[test]
    fn test_tick_ignores_stop_when_flat() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        strategy.trailing_stop = 100.0;
        assert!(strategy.on_tick(50.0, 0, 0.0).is_none());
    }

    #[test]
    fn test_no_exit_before_stop_established() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        assert!(strategy.on_tick(1.0, 10, 99.0).is_none());
    }

    #[test]
    fn test_stop_never_ratchets_down() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = entry_setup();

        strategy.on_candle_closed(&candles, 97.2, 0, 0.0).unwrap();
        let initial = strategy.trailing_stop();

        // same series re-evaluated in a long; dynamic stop equals the
        // current stop, so nothing moves, and it can never move lower
        strategy.on_candle_closed(&candles, 96.6, 10, 97.0);
        assert!(strategy.trailing_stop() >= initial);
    }

    #[test]
    fn test_breakeven_snap_when_profit_exceeds_trigger() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = entry_setup();
        let entry = 97.0;

        strategy.on_candle_closed(&candles, 97.2, 0, 0.0).unwrap();
        assert!(strategy.trailing_stop() < entry);

        // profit 1.5 > 1.5 * ATR (~1.218): stop jumps to entry
        strategy.on_candle_closed(&candles, 98.5, 10, entry);
        assert!((strategy.trailing_stop() - entry).abs() < 1e-9);
    }

    #[test]
    fn test_no_breakeven_snap_below_trigger() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = entry_setup();
        let entry = 97.0;

        strategy.on_candle_closed(&candles, 97.2, 0, 0.0).unwrap();
        let before = strategy.trailing_stop();

        // profit 0.5 under 1.5 * ATR: stop stays where it was
        strategy.on_candle_closed(&candles, 97.5, 10, entry);
        assert!((strategy.trailing_stop() - before).abs() < 1e-9);
    }

    #[test]
    fn test_overbought_tightens_multiplier() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        let candles = overbought_setup();

        strategy.on_candle_closed(&candles, 130.0, 10, 90.0);
        // hh - 1*ATR, not hh - 3*ATR
        assert!((strategy.trailing_stop() - 116.4326).abs() < 1e-3);
    }

    #[test]
    fn test_restart_rebuilds_stop_from_first_candle() {
        // fresh strategy instance holding a restored position
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        assert_eq!(strategy.trailing_stop(), 0.0);

        let candles = entry_setup();
        strategy.on_candle_closed(&candles, 96.6, 50, 96.0);
        assert!((strategy.trailing_stop() - 96.1644).abs() < 1e-3);
    }

    #[test]
    fn test_flat_evaluation_clears_stale_stop() {
        let mut strategy = RsiChandelierStrategy::new(StrategyConfig::default());
        strategy.trailing_stop = 96.0;

        let candles = entry_setup();
        // no entry at this price; the stale stop must not survive
        assert!(strategy.on_candle_closed(&candles, 96.9, 0, 0.0).is_none());
        assert_eq!(strategy.trailing_stop(), 0.0);
    }
}
