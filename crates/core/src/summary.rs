//! End-of-session results.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::{ExitReason, LegId, SessionStatus};

/// How a leg finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LegResult {
    /// Position entered and closed.
    Traded,
    /// Spot stayed inside the reference range.
    NoBreakout,
    /// Premium never confirmed the move.
    NotConfirmed,
    /// Entry or exit window had already passed, or the session was stopped.
    Skipped { reason: String },
    /// Entry order was not accepted.
    EntryFailed { reason: String },
    /// Unrecoverable error inside the leg.
    Failed { error: String },
}

impl LegResult {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Traded => "traded",
            Self::NoBreakout => "no breakout",
            Self::NotConfirmed => "not confirmed",
            Self::Skipped { .. } => "skipped",
            Self::EntryFailed { .. } => "entry failed",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegReport {
    pub leg_id: LegId,
    pub name: String,
    pub result: LegResult,
    pub symbol: Option<String>,
    pub quantity: u32,
    pub entry_price: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Decimal,
    pub pnl_pct: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub strategy: String,
    pub underlying: String,
    pub expiry: String,
    pub reference_high: Decimal,
    pub reference_low: Decimal,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub legs: Vec<LegReport>,
}

impl SessionSummary {
    #[must_use]
    pub fn total_pnl(&self) -> Decimal {
        self.legs.iter().map(|l| l.pnl).sum()
    }

    #[must_use]
    pub fn traded(&self) -> usize {
        self.legs
            .iter()
            .filter(|l| l.result == LegResult::Traded)
            .count()
    }

    #[must_use]
    pub fn winners(&self) -> usize {
        self.legs
            .iter()
            .filter(|l| l.result == LegResult::Traded && l.pnl > Decimal::ZERO)
            .count()
    }
}
