use crate::models::Symbol;
use crate::Result;
use std::env;

const DEFAULT_API_BASE: &str = "https://api.upstox.com";

/// Runtime settings, sourced from the environment (and `.env` via
/// dotenvy in main).
#[derive(Debug, Clone)]
pub struct Settings {
    pub access_token: String,
    pub api_base: String,
    /// Notional budget for each symbol's entries.
    pub allocated_capital: f64,
    pub state_file: String,
    pub trade_log: String,
    pub symbols: Vec<Symbol>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let access_token = env::var("UPSTOX_ACCESS_TOKEN")
            .map_err(|_| "UPSTOX_ACCESS_TOKEN must be set")?;

        let symbols = parse_symbols(
            &env::var("SYMBOLS").map_err(|_| "SYMBOLS must be set (NAME=INSTRUMENT_KEY,...)")?,
        )?;

        let allocated_capital = match env::var("ALLOCATED_CAPITAL") {
            Ok(raw) => raw
                .parse::<f64>()
                .map_err(|_| format!("ALLOCATED_CAPITAL is not a number: {raw}"))?,
            Err(_) => 100_000.0,
        };
        if allocated_capital <= 0.0 {
            return Err("ALLOCATED_CAPITAL must be positive".into());
        }

        Ok(Self {
            access_token,
            api_base: env::var("UPSTOX_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            allocated_capital,
            state_file: env::var("STATE_FILE").unwrap_or_else(|_| "trade_state.json".to_string()),
            trade_log: env::var("TRADE_LOG").unwrap_or_else(|_| "live_trades.csv".to_string()),
            symbols,
        })
    }
}

/// Parse `NAME=INSTRUMENT_KEY,NAME=INSTRUMENT_KEY,...`.
fn parse_symbols(raw: &str) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, key) = entry
            .split_once('=')
            .ok_or_else(|| format!("Bad symbol entry (expected NAME=KEY): {entry}"))?;
        if name.is_empty() || key.is_empty() {
            return Err(format!("Bad symbol entry (expected NAME=KEY): {entry}").into());
        }
        symbols.push(Symbol::new(name.trim(), key.trim()));
    }
    if symbols.is_empty() {
        return Err("SYMBOLS is empty".into());
    }
    Ok(symbols)
}
