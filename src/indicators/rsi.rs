//! Relative Strength Index over smoothed gains/losses.
//!
//! Uses Wilder smoothing (alpha = 1/period), not a simple moving average.
//! A small epsilon keeps the gain/loss ratio defined when the loss side
//! averages to zero.

use super::wilder_smooth;

const EPSILON: f64 = 1e-10;

/// RSI series aligned with `closes`. Entries are `None` until enough
/// deltas exist to fill the smoothing window.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if closes.len() < 2 {
        return out;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for window in closes.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let avg_gains = wilder_smooth(&gains, period);
    let avg_losses = wilder_smooth(&losses, period);

    for i in 1..closes.len() {
        if let (Some(gain), Some(loss)) = (avg_gains[i - 1], avg_losses[i - 1]) {
            let rs = gain / (loss + EPSILON);
            out[i] = Some(100.0 - 100.0 / (1.0 + rs));
        }
    }

    out
}

/// Dual-period oscillator: the arithmetic mean of a short-window and a
/// long-window RSI. `None` wherever either side is undefined.
pub fn composite_rsi_series(
    closes: &[f64],
    short_period: usize,
    long_period: usize,
) -> Vec<Option<f64>> {
    let short = rsi_series(closes, short_period);
    let long = rsi_series(closes, long_period);

    short
        .iter()
        .zip(long.iter())
        .map(|(s, l)| match (s, l) {
            (Some(s), Some(l)) => Some((s + l) / 2.0),
            _ => None,
        })
        .collect()
}
