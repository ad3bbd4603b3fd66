use super::{BrokerError, BrokerSession, OrderResult, OrderSide, OrderStatus, TickReceiver};
use crate::models::{Candle, Symbol, TickEvent};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// Upstox V3 market data + V2 order endpoints.
// Docs: https://upstox.com/developer/api-documentation
const DEFAULT_API_BASE: &str = "https://api.upstox.com";

/// REST session against the Upstox API.
///
/// Holds the symbol universe so order placement can resolve a symbol name
/// to its instrument key.
pub struct UpstoxSession {
    client: Client,
    base_url: String,
    access_token: String,
    instrument_keys: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CandleEnvelope {
    #[serde(default)]
    data: CandleData,
}

#[derive(Debug, Default, Deserialize)]
struct CandleData {
    #[serde(default)]
    candles: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    status: Option<String>,
    #[serde(default)]
    data: OrderData,
}

#[derive(Debug, Default, Deserialize)]
struct OrderData {
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(default)]
    data: HashMap<String, Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    last_price: Option<f64>,
    instrument_token: Option<String>,
}

impl UpstoxSession {
    pub fn new(access_token: String, symbols: &[Symbol]) -> Result<Self> {
        Self::with_base_url(access_token, symbols, DEFAULT_API_BASE.to_string())
    }

    pub fn with_base_url(
        access_token: String,
        symbols: &[Symbol],
        base_url: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            client,
            base_url,
            access_token,
            instrument_keys: symbols
                .iter()
                .map(|s| (s.name.clone(), s.instrument_key.clone()))
                .collect(),
        })
    }

    fn encode_key(instrument_key: &str) -> String {
        // Instrument keys embed a pipe ("NSE_EQ|INE...") that must be
        // percent-encoded in path segments.
        instrument_key.replace('|', "%7C")
    }

    async fn fetch_candles(&self, url: &str) -> Result<Vec<Candle>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Box::new(BrokerError::Http(response.status().as_u16())));
        }

        let envelope: CandleEnvelope = response.json().await?;
        let mut candles = Vec::with_capacity(envelope.data.candles.len());
        for row in &envelope.data.candles {
            candles.push(parse_candle_row(row)?);
        }

        // API returns newest-first; the cache expects ascending order
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    /// Spawn a background poller that streams LTP quotes for the given
    /// instruments as `TickEvent`s. `healthy` is cleared whenever a poll
    /// fails, and restored by the cache on the next successful ingestion.
    pub fn spawn_quote_poller(
        self: Arc<Self>,
        instrument_keys: Vec<String>,
        poll_interval: Duration,
        healthy: Arc<std::sync::atomic::AtomicBool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> TickReceiver {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let joined = instrument_keys.join(",");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        tracing::info!("Quote poller stopping");
                        return;
                    }
                }

                match self.fetch_quotes(&joined).await {
                    Ok(ticks) => {
                        for tick in ticks {
                            if tx.send(tick).await.is_err() {
                                return; // consumer gone
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Quote poll failed: {}", e);
                        healthy.store(false, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            }
        });

        rx
    }

    async fn fetch_quotes(&self, joined_keys: &str) -> Result<Vec<TickEvent>> {
        let url = format!(
            "{}/v3/market-quote/ltp?instrument_key={}",
            self.base_url, joined_keys
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Box::new(BrokerError::Http(response.status().as_u16())));
        }

        let envelope: QuoteEnvelope = response.json().await?;
        let now = Utc::now();
        let ticks = envelope
            .data
            .into_iter()
            .filter_map(|(key, quote)| {
                let price = quote.last_price?;
                Some(TickEvent {
                    instrument_key: quote.instrument_token.unwrap_or(key),
                    price,
                    server_time: now,
                })
            })
            .collect();

        Ok(ticks)
    }
}

#[async_trait]
impl BrokerSession for UpstoxSession {
    async fn get_history(
        &self,
        instrument_key: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v3/historical-candle/{}/minutes/1/{}/{}",
            self.base_url,
            Self::encode_key(instrument_key),
            to.format("%Y-%m-%d"),
            from.format("%Y-%m-%d"),
        );
        self.fetch_candles(&url).await
    }

    async fn get_intraday(&self, instrument_key: &str) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v3/historical-candle/intraday/{}/minutes/1",
            self.base_url,
            Self::encode_key(instrument_key),
        );
        self.fetch_candles(&url).await
    }

    async fn place_market_order(
        &self,
        side: OrderSide,
        symbol: &str,
        qty: u32,
        unique_id: &str,
    ) -> Result<OrderResult> {
        let instrument_token = self
            .instrument_keys
            .get(symbol)
            .ok_or_else(|| format!("Unknown symbol: {symbol}"))?;

        let transaction_type = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };

        let payload = serde_json::json!({
            "quantity": qty,
            "product": "D",
            "validity": "DAY",
            "price": 0,
            "tag": unique_id,
            "instrument_token": instrument_token,
            "order_type": "MARKET",
            "transaction_type": transaction_type,
            "disclosed_quantity": 0,
            "trigger_price": 0,
            "is_amo": false,
        });

        let response = self
            .client
            .post(format!("{}/v2/order/place", self.base_url))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Box::new(BrokerError::Http(response.status().as_u16())));
        }

        let envelope: OrderEnvelope = response.json().await?;
        let status = match envelope.status.as_deref() {
            Some("success") => OrderStatus::Filled,
            _ => OrderStatus::Rejected,
        };

        Ok(OrderResult {
            status,
            order_id: envelope.data.order_id.unwrap_or_default(),
        })
    }
}

fn parse_candle_row(row: &[Value]) -> Result<Candle> {
    if row.len() < 5 {
        return Err(Box::new(BrokerError::Malformed(format!(
            "candle row has {} fields, expected at least 5",
            row.len()
        ))));
    }

    let timestamp_str = row[0]
        .as_str()
        .ok_or_else(|| BrokerError::Malformed("candle timestamp is not a string".into()))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp_str)
        .map_err(|e| BrokerError::Malformed(format!("bad candle timestamp: {e}")))?
        .with_timezone(&Utc);

    let number = |value: &Value, field: &str| -> std::result::Result<f64, BrokerError> {
        value
            .as_f64()
            .ok_or_else(|| BrokerError::Malformed(format!("candle {field} is not numeric")))
    };

    Ok(Candle {
        timestamp,
        open: number(&row[1], "open")?,
        high: number(&row[2], "high")?,
        low: number(&row[3], "low")?,
        close: number(&row[4], "close")?,
    })
}
