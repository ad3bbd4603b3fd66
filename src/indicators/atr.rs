//! Average True Range and the chandelier trailing channel.
//!
//! True Range per bar is the greatest of:
//! - Current High - Current Low
//! - Abs(Current High - Previous Close)
//! - Abs(Current Low - Previous Close)
//!
//! ATR applies Wilder smoothing to the true ranges; the chandelier channel
//! is the rolling highest high over the same window minus ATR times a
//! multiplier.

use super::wilder_smooth;
use crate::models::Candle;

/// True range per bar. The first bar has no previous close, so the output
/// has `candles.len() - 1` entries aligned to bars `1..`.
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let high = pair[1].high;
            let low = pair[1].low;
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// ATR series aligned with `candles`; `None` until the window fills.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if candles.len() < 2 {
        return out;
    }

    let smoothed = wilder_smooth(&true_ranges(candles), period);
    for i in 1..candles.len() {
        out[i] = smoothed[i - 1];
    }

    out
}

/// Chandelier channel: rolling max high over `period` bars minus
/// ATR * `multiplier`. Defined only where both the high window and the
/// ATR are defined.
pub fn chandelier_series(candles: &[Candle], period: usize, multiplier: f64) -> Vec<Option<f64>> {
    let atr = atr_series(candles, period);
    let mut out = vec![None; candles.len()];

    for i in 0..candles.len() {
        if i + 1 < period {
            continue;
        }
        if let Some(atr_value) = atr[i] {
            let highest_high = candles[i + 1 - period..=i]
                .iter()
                .map(|c| c.high)
                .fold(f64::MIN, f64::max);
            out[i] = Some(highest_high - atr_value * multiplier);
        }
    }

    out
}
