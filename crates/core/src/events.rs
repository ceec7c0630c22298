//! Session timeline events.
//!
//! Every lifecycle step of a session and its legs is published as a
//! [`SessionEvent`] wrapped in an [`EventRecord`]. The records carry enough
//! detail (symbols, prices, quantities, reason codes) to rebuild a session
//! timeline and to find positions left open by a crashed run.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 1-based position of a leg in the configuration.
pub type LegId = u32;

/// Breakout direction of the underlying relative to the reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Spot above the previous high; trades calls.
    Up,
    /// Spot below the previous low; trades puts.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Coarse lifecycle phase of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegPhaseKind {
    Waiting,
    BreakoutCheck,
    Confirming,
    Entering,
    Active,
    Closed,
}

impl fmt::Display for LegPhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::BreakoutCheck => "BREAKOUT_CHECK",
            Self::Confirming => "CONFIRMING",
            Self::Entering => "ENTERING",
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Running,
    Completed,
    Crashed,
}

/// Why a position was closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    /// Price touched the local stop.
    StopLoss,
    /// The broker-side stop order had already filled.
    BrokerStopFilled,
    AutoClose { pct: Decimal },
    /// Profit fell back to the trailed lock target.
    TrailExit { target_pct: Decimal },
    ProfitLock,
    TimeExit,
    SessionStop,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL_BREACH"),
            Self::BrokerStopFilled => write!(f, "SL_EXECUTED_ON_BROKER"),
            Self::AutoClose { pct } => write!(f, "AUTO_CLOSE_{}PCT", pct.normalize()),
            Self::TrailExit { target_pct } => write!(f, "TRAIL_EXIT_{:.1}PCT", target_pct),
            Self::ProfitLock => write!(f, "PROFIT_LOCK"),
            Self::TimeExit => write!(f, "TIME_EXIT"),
            Self::SessionStop => write!(f, "SESSION_STOP"),
        }
    }
}

/// What moved a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAdjustment {
    /// Whole-interval trailing of the hard stop.
    Trailing,
    /// Stop raised to the freshly locked profit level.
    ProfitLock,
}

/// Envelope stored by sinks and journals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        strategy: String,
        underlying: String,
        expiry: String,
        strike_diff: Decimal,
        lot_size: u32,
        reference_high: Decimal,
        reference_low: Decimal,
        legs: usize,
    },
    PhaseChanged {
        leg_id: LegId,
        from: LegPhaseKind,
        to: LegPhaseKind,
    },
    BreakoutDetected {
        leg_id: LegId,
        direction: Direction,
        spot: Decimal,
        distance: Decimal,
    },
    NoBreakout {
        leg_id: LegId,
        spot: Decimal,
    },
    StrikeResolved {
        leg_id: LegId,
        symbol: String,
        strike: Decimal,
        spot: Decimal,
    },
    ConfirmationReset {
        leg_id: LegId,
        reset: u32,
        old_reference: Decimal,
        new_reference: Decimal,
        drop_pct: Decimal,
    },
    ConfirmationFinished {
        leg_id: LegId,
        confirmed: bool,
        reference: Decimal,
        last_price: Option<Decimal>,
        resets: u32,
    },
    LegEntered {
        leg_id: LegId,
        leg_name: String,
        symbol: String,
        quantity: u32,
        indicative_price: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        order_id: String,
    },
    StopOrderPlaced {
        leg_id: LegId,
        order_id: String,
        trigger_price: Decimal,
        limit_price: Decimal,
    },
    StopUpdated {
        leg_id: LegId,
        old_stop: Decimal,
        new_stop: Decimal,
        cause: StopAdjustment,
        pnl_pct: Decimal,
    },
    ProfitLockUpdated {
        leg_id: LegId,
        old_target_pct: Option<Decimal>,
        new_target_pct: Decimal,
        pnl_pct: Decimal,
    },
    LegExited {
        leg_id: LegId,
        symbol: String,
        quantity: u32,
        entry_price: Decimal,
        exit_price: Decimal,
        pnl: Decimal,
        pnl_pct: Decimal,
        reason: ExitReason,
        exit_order_id: Option<String>,
    },
    /// The exit order never reached the broker, so the broker position may
    /// still be open. Carries the stop order put back in its place, if any.
    ExitOrderFailed {
        leg_id: LegId,
        symbol: String,
        error: String,
        restored_stop_order_id: Option<String>,
    },
    LegSkipped {
        leg_id: LegId,
        reason: String,
    },
    LegFailed {
        leg_id: LegId,
        error: String,
    },
    SessionClosed {
        status: SessionStatus,
        total_pnl: Decimal,
    },
    SessionCrashed {
        reason: String,
    },
}

impl SessionEvent {
    /// Leg this event belongs to, if any.
    #[must_use]
    pub const fn leg_id(&self) -> Option<LegId> {
        match self {
            Self::PhaseChanged { leg_id, .. }
            | Self::BreakoutDetected { leg_id, .. }
            | Self::NoBreakout { leg_id, .. }
            | Self::StrikeResolved { leg_id, .. }
            | Self::ConfirmationReset { leg_id, .. }
            | Self::ConfirmationFinished { leg_id, .. }
            | Self::LegEntered { leg_id, .. }
            | Self::StopOrderPlaced { leg_id, .. }
            | Self::StopUpdated { leg_id, .. }
            | Self::ProfitLockUpdated { leg_id, .. }
            | Self::LegExited { leg_id, .. }
            | Self::ExitOrderFailed { leg_id, .. }
            | Self::LegSkipped { leg_id, .. }
            | Self::LegFailed { leg_id, .. } => Some(*leg_id),
            Self::SessionStarted { .. }
            | Self::SessionClosed { .. }
            | Self::SessionCrashed { .. } => None,
        }
    }

    /// Short snake_case name, as written to the journal.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::PhaseChanged { .. } => "phase_changed",
            Self::BreakoutDetected { .. } => "breakout_detected",
            Self::NoBreakout { .. } => "no_breakout",
            Self::StrikeResolved { .. } => "strike_resolved",
            Self::ConfirmationReset { .. } => "confirmation_reset",
            Self::ConfirmationFinished { .. } => "confirmation_finished",
            Self::LegEntered { .. } => "leg_entered",
            Self::StopOrderPlaced { .. } => "stop_order_placed",
            Self::StopUpdated { .. } => "stop_updated",
            Self::ProfitLockUpdated { .. } => "profit_lock_updated",
            Self::LegExited { .. } => "leg_exited",
            Self::ExitOrderFailed { .. } => "exit_order_failed",
            Self::LegSkipped { .. } => "leg_skipped",
            Self::LegFailed { .. } => "leg_failed",
            Self::SessionClosed { .. } => "session_closed",
            Self::SessionCrashed { .. } => "session_crashed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exit_reason_codes() {
        assert_eq!(ExitReason::StopLoss.to_string(), "SL_BREACH");
        assert_eq!(
            ExitReason::AutoClose { pct: dec!(12.50) }.to_string(),
            "AUTO_CLOSE_12.5PCT"
        );
        assert_eq!(
            ExitReason::TrailExit { target_pct: dec!(3) }.to_string(),
            "TRAIL_EXIT_3.0PCT"
        );
        assert_eq!(ExitReason::TimeExit.to_string(), "TIME_EXIT");
    }

    #[test]
    fn record_serializes_flat_with_event_tag() {
        let record = EventRecord {
            session_id: "s-1".to_string(),
            at: Utc::now(),
            event: SessionEvent::LegSkipped {
                leg_id: 2,
                reason: "exit time passed".to_string(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "leg_skipped");
        assert_eq!(json["leg_id"], 2);
        assert_eq!(json["session_id"], "s-1");

        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
