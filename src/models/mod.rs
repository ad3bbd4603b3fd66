use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tradeable instrument: display name plus the broker's instrument key.
///
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub name: String,
    pub instrument_key: String,
}

impl Symbol {
    pub fn new(name: impl Into<String>, instrument_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrument_key: instrument_key.into(),
        }
    }
}

/// One-minute OHLC bar. Each symbol's series is sorted by timestamp with
/// no duplicates (last write wins on collision).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Buy => "BUY",
            OrderAction::Sell => "SELL",
        }
    }
}

/// A queued order: produced by the orchestrator, consumed exactly once by
/// the execution worker.
#[derive(Debug, Clone)]
pub struct OrderTask {
    pub action: OrderAction,
    pub symbol: String,
    pub qty: u32,
    pub reference_price: f64,
    pub reason: String,
}

/// An open position as recorded in the durable ledger.
///
/// Only ever created from a confirmed BUY fill and deleted on a confirmed
/// SELL fill; absence means flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub qty: u32,
    pub order_id: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
}

/// A live price tick from the broker's quote stream.
#[derive(Debug, Clone)]
pub struct TickEvent {
    pub instrument_key: String,
    pub price: f64,
    pub server_time: DateTime<Utc>,
}
