//! Session-wide record of closed legs.
//!
//! The ledger is the cross-leg half of the exit invariant: a leg's final P&L
//! is written here exactly once, while the leg still holds its position lock.

use std::collections::BTreeMap;

use breakout_core::{ExitReason, LegId};
use parking_lot::Mutex;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub symbol: String,
    pub pnl: Decimal,
    pub reason: ExitReason,
}

#[derive(Debug, Default)]
pub struct ExitLedger {
    exits: Mutex<BTreeMap<LegId, LedgerEntry>>,
}

impl ExitLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a leg's exit. Returns `false`, leaving the first entry intact,
    /// if the leg was already recorded.
    pub fn record(&self, leg_id: LegId, entry: LedgerEntry) -> bool {
        let mut exits = self.exits.lock();
        if exits.contains_key(&leg_id) {
            tracing::error!(leg_id, reason = %entry.reason, "Duplicate exit rejected by ledger");
            return false;
        }
        exits.insert(leg_id, entry);
        true
    }

    #[must_use]
    pub fn get(&self, leg_id: LegId) -> Option<LedgerEntry> {
        self.exits.lock().get(&leg_id).cloned()
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.exits.lock().len()
    }

    #[must_use]
    pub fn total_pnl(&self) -> Decimal {
        self.exits.lock().values().map(|e| e.pnl).sum()
    }
}
