// Broker boundary: everything the engine needs from the broker lives
// behind this narrow interface. External response shapes are validated in
// the concrete client, never inside core logic.

pub mod upstox;

pub use upstox::UpstoxSession;

use crate::models::{Candle, TickEvent};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;

/// Order direction at the broker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Broker's verdict on a market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    /// Confirmed fill; the only status that mutates the ledger.
    Filled,
    /// Anything the broker reported that is not a confirmed fill.
    Rejected,
}

/// Fixed result shape for an order submission.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub status: OrderStatus,
    pub order_id: String,
}

/// Errors raised while adapting broker responses at the boundary.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker returned HTTP {0}")]
    Http(u16),
    #[error("malformed broker response: {0}")]
    Malformed(String),
}

/// A broker session: historical candles, today's intraday candles, and
/// market order placement. Implementations are shared across tasks as
/// `Arc<dyn BrokerSession>`.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Daily-ranged one-minute history for an instrument.
    async fn get_history(
        &self,
        instrument_key: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> crate::Result<Vec<Candle>>;

    /// Today's one-minute candles for an instrument.
    async fn get_intraday(&self, instrument_key: &str) -> crate::Result<Vec<Candle>>;

    /// Place a market order. `unique_id` gives the broker idempotency
    /// context; duplicate submission is already prevented upstream by the
    /// ledger's pending lock.
    async fn place_market_order(
        &self,
        side: OrderSide,
        symbol: &str,
        qty: u32,
        unique_id: &str,
    ) -> crate::Result<OrderResult>;
}

pub type SharedBrokerSession = Arc<dyn BrokerSession>;

/// Live tick events as delivered by the quote stream.
pub type TickReceiver = tokio::sync::mpsc::Receiver<TickEvent>;
