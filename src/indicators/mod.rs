// Technical indicators module
// Implements the dual-period RSI oscillator and the ATR/chandelier channel

pub mod atr;
pub mod rsi;

pub use atr::{atr_series, chandelier_series, true_ranges};
pub use rsi::{composite_rsi_series, rsi_series};

/// Wilder smoothing: seed with a simple average over the first `period`
/// values, then recurse with alpha = 1/period.
///
/// Output is aligned with the input; entries before the seed window fills
/// are `None` rather than a numeric default.
pub(crate) fn wilder_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let mut avg: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(avg);

    for i in period..values.len() {
        avg = (avg * (period as f64 - 1.0) + values[i]) / period as f64;
        out[i] = Some(avg);
    }

    out
}
