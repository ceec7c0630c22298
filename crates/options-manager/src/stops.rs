//! Hard stop and trailing stop rules.

use breakout_core::{ExitReason, StopAdjustment};
use rust_decimal::Decimal;

use crate::plan::TrailingStop;
use crate::types::{LockState, RiskAction, RiskState};

/// Exit if `price` is at or below the stop.
///
/// When a lock-then-trail target is engaged the stop sits at that target, so
/// a breach at or below it is reported as a trail exit.
pub fn check_stop_breach(state: &RiskState, price: Decimal) -> Option<ExitReason> {
    if price > state.stop_price {
        return None;
    }

    let pnl_pct = state.pnl_pct(price);
    let reason = match state.lock {
        LockState::Locked { target_pct, .. } if pnl_pct <= target_pct => {
            ExitReason::TrailExit { target_pct }
        }
        _ => ExitReason::StopLoss,
    };
    tracing::warn!(
        %price,
        stop = %state.stop_price,
        pnl_pct = %pnl_pct.round_dp(2),
        reason = %reason,
        "Stop breached"
    );
    Some(reason)
}

/// Raises the stop by `move_pct` of entry for every whole `trigger_pct` of
/// profit gained since the last trail.
pub fn trail_stop(
    state: &mut RiskState,
    pnl_pct: Decimal,
    params: &TrailingStop,
) -> Option<RiskAction> {
    if pnl_pct <= Decimal::ZERO || params.trigger_pct <= Decimal::ZERO {
        return None;
    }
    let increase = pnl_pct - state.last_sl_trail_level;
    if increase < params.trigger_pct {
        return None;
    }

    let intervals = (increase / params.trigger_pct).floor();
    let raise = state.entry_price * params.move_pct * intervals / Decimal::ONE_HUNDRED;
    let old_stop = state.stop_price;
    let new_stop = old_stop + raise;
    if new_stop <= old_stop {
        return None;
    }

    state.stop_price = new_stop;
    state.last_sl_trail_level = pnl_pct;
    tracing::info!(
        %old_stop,
        %new_stop,
        pnl_pct = %pnl_pct.round_dp(2),
        %intervals,
        "Trailing stop raised"
    );
    Some(RiskAction::RaiseStop {
        old_stop,
        new_stop,
        cause: StopAdjustment::Trailing,
    })
}
