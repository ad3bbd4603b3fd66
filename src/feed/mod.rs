// Market data plumbing: in-memory candle cache, tick ingestion,
// resampling and the staleness watchdog.
pub mod cache;
pub mod resample;
pub mod watchdog;

pub use cache::MarketDataCache;
pub use resample::resample_candles;
pub use watchdog::{run_watchdog, WatchdogConfig};
