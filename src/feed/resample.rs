use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};

/// Floor a timestamp to the start of its aggregation bucket.
fn bucket_start(ts: DateTime<Utc>, interval_secs: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(interval_secs);
    DateTime::from_timestamp(floored, 0).unwrap_or(ts)
}

/// Aggregate 1-minute candles into `interval`-wide buckets.
///
/// Buckets use standard OHLC aggregation: first open, max high, min low,
/// last close. The trailing bucket is dropped unless the series contains
/// what would be its final 1-minute bar, so callers only ever see fully
/// formed candles.
pub fn resample_candles(candles: &[Candle], interval: Duration) -> Vec<Candle> {
    let interval_secs = interval.num_seconds();
    if candles.is_empty() || interval_secs < 60 {
        return Vec::new();
    }

    let mut out: Vec<Candle> = Vec::new();
    let mut current_bucket: Option<DateTime<Utc>> = None;

    for candle in candles {
        let bucket = bucket_start(candle.timestamp, interval_secs);
        match current_bucket {
            Some(b) if b == bucket => {
                let agg = out.last_mut().unwrap();
                agg.high = agg.high.max(candle.high);
                agg.low = agg.low.min(candle.low);
                agg.close = candle.close;
            }
            _ => {
                current_bucket = Some(bucket);
                out.push(Candle {
                    timestamp: bucket,
                    open: candle.open,
                    high: candle.high,
                    low: candle.low,
                    close: candle.close,
                });
            }
        }
    }

    // Only keep the trailing bucket once its last minute bar has arrived.
    if let (Some(bucket), Some(last)) = (current_bucket, candles.last()) {
        let elapsed = (last.timestamp - bucket).num_seconds();
        if elapsed < interval_secs - 60 {
            out.pop();
        }
    }

    out
}
