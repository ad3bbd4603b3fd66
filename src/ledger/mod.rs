// Position ledger: per-symbol holdings with in-flight order locks and a
// durable JSON snapshot behind a pluggable store.
pub mod store;

pub use store::{FileStateStore, MemoryStateStore, StateStore};

use crate::models::Position;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    positions: HashMap<String, Position>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    positions: HashMap<String, Position>,
    // symbols with an order in flight; never persisted
    pending: HashSet<String>,
}

/// Source of truth for what the bot holds.
///
/// A symbol's lock must be held from signal acceptance until its order
/// task is fully processed, so at most one order per symbol is ever in
/// flight. Mutations persist under the same mutex that applied them,
/// keeping the snapshot ordered with the in-memory state.
pub struct PositionLedger {
    inner: Mutex<LedgerInner>,
    store: Box<dyn StateStore>,
}

impl PositionLedger {
    /// Restore the ledger from its store. A missing or unreadable
    /// snapshot starts the ledger empty rather than refusing to boot.
    pub fn load(store: Box<dyn StateStore>) -> Self {
        let positions = match store.load() {
            Ok(Some(contents)) => match serde_json::from_str::<Snapshot>(&contents) {
                Ok(snapshot) => {
                    info!("Restored {} open position(s)", snapshot.positions.len());
                    snapshot.positions
                }
                Err(e) => {
                    warn!("Ignoring corrupt position snapshot: {}", e);
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Could not read position snapshot: {}", e);
                HashMap::new()
            }
        };

        Self {
            inner: Mutex::new(LedgerInner {
                positions,
                pending: HashSet::new(),
            }),
            store,
        }
    }

    /// Try to claim the order lock for a symbol. Returns false when an
    /// order is already in flight for it.
    pub fn acquire_lock(&self, symbol: &str) -> bool {
        self.inner.lock().unwrap().pending.insert(symbol.to_string())
    }

    /// Release a symbol's order lock. Safe to call when not held.
    pub fn release_lock(&self, symbol: &str) {
        self.inner.lock().unwrap().pending.remove(symbol);
    }

    pub fn is_locked(&self, symbol: &str) -> bool {
        self.inner.lock().unwrap().pending.contains(symbol)
    }

    /// Record a confirmed buy fill and persist.
    pub fn register_fill(&self, symbol: &str, position: Position) {
        let mut guard = self.inner.lock().unwrap();
        guard.positions.insert(symbol.to_string(), position);
        self.persist(&guard);
    }

    /// Drop a symbol's position after a confirmed exit and persist.
    pub fn clear_position(&self, symbol: &str) {
        let mut guard = self.inner.lock().unwrap();
        guard.positions.remove(symbol);
        self.persist(&guard);
    }

    pub fn holdings_qty(&self, symbol: &str) -> u32 {
        let guard = self.inner.lock().unwrap();
        guard.positions.get(symbol).map(|p| p.qty).unwrap_or(0)
    }

    pub fn entry_price(&self, symbol: &str) -> f64 {
        let guard = self.inner.lock().unwrap();
        guard.positions.get(symbol).map(|p| p.entry_price).unwrap_or(0.0)
    }

    pub fn open_position_count(&self) -> usize {
        self.inner.lock().unwrap().positions.len()
    }

    fn persist(&self, inner: &LedgerInner) {
        let snapshot = Snapshot {
            positions: inner.positions.clone(),
        };
        let serialized = match serde_json::to_string_pretty(&snapshot) {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not serialize position snapshot: {}", e);
                return;
            }
        };
        // Trading continues on persistence failure; the snapshot is a
        // restart aid, not a gate.
        if let Err(e) = self.store.replace(&serialized) {
            warn!("Could not persist position snapshot: {}", e);
        }
    }
}
