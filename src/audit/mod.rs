use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct TradeRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Quantity")]
    quantity: u32,
    #[serde(rename = "PnL")]
    pnl: f64,
    #[serde(rename = "Balance")]
    balance: f64,
    #[serde(rename = "Reason")]
    reason: String,
}

/// Append-only CSV audit trail of executed trades.
///
/// Each row carries a running balance: the previous row's balance plus
/// this trade's realized PnL, seeded from the configured starting
/// capital. The log survives restarts and accumulates across runs.
pub struct TradeRecorder {
    path: PathBuf,
    initial_capital: f64,
    // serializes read-last-balance-then-append
    guard: Mutex<()>,
}

impl TradeRecorder {
    pub fn new(path: impl Into<PathBuf>, initial_capital: f64) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let mut writer = csv::Writer::from_path(&path)
                .with_context(|| format!("Failed to create trade log {}", path.display()))?;
            writer.write_record([
                "Timestamp", "Action", "Symbol", "Price", "Quantity", "PnL", "Balance", "Reason",
            ])?;
            writer.flush()?;
        }
        Ok(Self {
            path,
            initial_capital,
            guard: Mutex::new(()),
        })
    }

    /// Append an executed trade. Failures are logged, never propagated;
    /// a broken audit trail must not halt trading.
    pub fn record(&self, action: &str, symbol: &str, price: f64, qty: u32, pnl: f64, reason: &str) {
        let _guard = self.guard.lock().unwrap();

        let balance = last_balance(&self.path).unwrap_or(self.initial_capital) + pnl;
        let row = TradeRow {
            timestamp: Utc::now().to_rfc3339(),
            action: action.to_string(),
            symbol: symbol.to_string(),
            price,
            quantity: qty,
            pnl,
            balance,
            reason: reason.to_string(),
        };

        if let Err(e) = self.append(&row) {
            warn!("Could not record trade for {}: {}", symbol, e);
        }
    }

    fn append(&self, row: &TradeRow) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    /// Sum of realized PnL across every logged trade. Returns 0.0 when
    /// the log is unreadable.
    pub fn total_realized_pnl(&self) -> f64 {
        let _guard = self.guard.lock().unwrap();
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(r) => r,
            Err(_) => return 0.0,
        };
        reader
            .deserialize::<TradeRow>()
            .filter_map(|row| row.ok())
            .map(|row| row.pnl)
            .sum()
    }
}

fn last_balance(path: &Path) -> Option<f64> {
    let mut reader = csv::Reader::from_path(path).ok()?;
    reader
        .deserialize::<TradeRow>()
        .filter_map(|row| row.ok())
        .last()
        .map(|row| row.balance)
}
