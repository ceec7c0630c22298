//! Position and risk-state types.

use breakout_core::{ExitReason, StopAdjustment};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Percent move from `entry` to `price`.
#[must_use]
pub fn pct_change(entry: Decimal, price: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    (price - entry) / entry * HUNDRED
}

/// `entry` moved by `pct` percent.
#[must_use]
pub fn price_at_pct(entry: Decimal, pct: Decimal) -> Decimal {
    entry * (Decimal::ONE + pct / HUNDRED)
}

/// Progress of the profit capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    /// No target yet.
    Armed,
    /// Lock-then-trail engaged: exit when profit falls back to `target_pct`.
    Locked {
        target_pct: Decimal,
        last_trail_level: Decimal,
    },
    /// Progressive lock: exit once profit reaches `target_pct`.
    Escalating {
        target_pct: Decimal,
        next_level_pct: Decimal,
    },
}

impl LockState {
    #[must_use]
    pub const fn target_pct(&self) -> Option<Decimal> {
        match self {
            Self::Armed => None,
            Self::Locked { target_pct, .. } | Self::Escalating { target_pct, .. } => {
                Some(*target_pct)
            }
        }
    }
}

/// Mutable risk bookkeeping of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskState {
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub highest_price: Decimal,
    /// Profit % at which the hard stop was last trailed.
    pub last_sl_trail_level: Decimal,
    pub lock: LockState,
}

impl RiskState {
    /// Fresh state for a fill at `entry_price` with a stop `sl_pct` below it.
    #[must_use]
    pub fn new(entry_price: Decimal, sl_pct: Decimal) -> Self {
        Self {
            entry_price,
            stop_price: price_at_pct(entry_price, -sl_pct),
            highest_price: entry_price,
            last_sl_trail_level: Decimal::ZERO,
            lock: LockState::Armed,
        }
    }

    #[must_use]
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        pct_change(self.entry_price, price)
    }
}

/// Decision produced by the risk rules for one price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RiskAction {
    RaiseStop {
        old_stop: Decimal,
        new_stop: Decimal,
        cause: StopAdjustment,
    },
    LockTarget {
        old_target_pct: Option<Decimal>,
        new_target_pct: Decimal,
    },
    Exit { reason: ExitReason },
}

/// How a position was closed. Written once, when it goes inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub price: Decimal,
    pub at: DateTime<Utc>,
    pub reason: ExitReason,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    /// `None` when no exit order was placed.
    pub order_id: Option<String>,
}

/// An entered position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: u32,
    pub entry_price: Decimal,
    pub entered_at: DateTime<Utc>,
    pub stop_order_id: Option<String>,
    pub risk: RiskState,
    pub last_price: Decimal,
    pub active: bool,
    pub exit: Option<ExitRecord>,
}

impl Position {
    #[must_use]
    pub fn open(
        symbol: String,
        quantity: u32,
        entry_price: Decimal,
        sl_pct: Decimal,
        entered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            quantity,
            entry_price,
            entered_at,
            stop_order_id: None,
            risk: RiskState::new(entry_price, sl_pct),
            last_price: entry_price,
            active: true,
            exit: None,
        }
    }

    /// Realised P&L in currency for an exit at `price`.
    #[must_use]
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * Decimal::from(self.quantity)
    }

    /// Marks the position closed. Returns `false` if it already was.
    pub fn close(&mut self, record: ExitRecord) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.exit = Some(record);
        true
    }
}
