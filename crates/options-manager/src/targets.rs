//! Profit capture rules: auto-close and the three lock modes.

use breakout_core::{ExitReason, StopAdjustment};
use rust_decimal::Decimal;

use crate::plan::ProfitMode;
use crate::types::{price_at_pct, LockState, RiskAction, RiskState};

/// Trailed targets stay at least this far below current profit.
const TRAIL_CAP_BUFFER_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Exit once profit reaches the leg's auto-close level.
pub fn check_auto_close(pnl_pct: Decimal, auto_close_pct: Option<Decimal>) -> Option<ExitReason> {
    let pct = auto_close_pct?;
    if pnl_pct < pct {
        return None;
    }
    tracing::info!(pnl_pct = %pnl_pct.round_dp(2), threshold = %pct, "Auto-close reached");
    Some(ExitReason::AutoClose { pct })
}

/// Applies the leg's profit mode, appending any resulting actions.
///
/// Targets only ever move up. An exit action, if any, is always last.
pub fn check_profit_targets(
    state: &mut RiskState,
    pnl_pct: Decimal,
    mode: &ProfitMode,
    actions: &mut Vec<RiskAction>,
) {
    match *mode {
        ProfitMode::None => {}
        ProfitMode::LockThenTrail {
            lock_trigger_pct,
            first_lock_pct,
            trail_trigger_pct,
            trail_move_pct,
        } => lock_then_trail(
            state,
            pnl_pct,
            LockThenTrail {
                lock_trigger_pct,
                first_lock_pct,
                trail_trigger_pct,
                trail_move_pct,
            },
            actions,
        ),
        ProfitMode::Progressive {
            lock_profit_pct,
            step_pct,
            step_threshold_pct,
        } => progressive(state, pnl_pct, lock_profit_pct, step_pct, step_threshold_pct, actions),
        ProfitMode::SimpleLock { lock_profit_pct } => {
            if pnl_pct >= lock_profit_pct {
                tracing::info!(
                    pnl_pct = %pnl_pct.round_dp(2),
                    target = %lock_profit_pct,
                    "Profit lock reached"
                );
                actions.push(RiskAction::Exit {
                    reason: ExitReason::ProfitLock,
                });
            }
        }
    }
}

#[derive(Clone, Copy)]
struct LockThenTrail {
    lock_trigger_pct: Decimal,
    first_lock_pct: Decimal,
    trail_trigger_pct: Decimal,
    trail_move_pct: Decimal,
}

fn lock_then_trail(
    state: &mut RiskState,
    pnl_pct: Decimal,
    p: LockThenTrail,
    actions: &mut Vec<RiskAction>,
) {
    let (target_pct, last_trail_level) = match state.lock {
        LockState::Locked {
            target_pct,
            last_trail_level,
        } => (target_pct, last_trail_level),
        LockState::Armed if pnl_pct >= p.lock_trigger_pct => {
            state.lock = LockState::Locked {
                target_pct: p.first_lock_pct,
                last_trail_level: pnl_pct,
            };
            tracing::info!(
                pnl_pct = %pnl_pct.round_dp(2),
                target = %p.first_lock_pct,
                "Profit lock engaged"
            );
            actions.push(RiskAction::LockTarget {
                old_target_pct: None,
                new_target_pct: p.first_lock_pct,
            });
            raise_stop_to_target(state, p.first_lock_pct, actions);
            // Engaging at or below the first lock also exits on this tick.
            (p.first_lock_pct, pnl_pct)
        }
        LockState::Armed | LockState::Escalating { .. } => return,
    };

    if pnl_pct <= target_pct {
        tracing::info!(
            pnl_pct = %pnl_pct.round_dp(2),
            target = %target_pct,
            "Profit fell back to lock target"
        );
        actions.push(RiskAction::Exit {
            reason: ExitReason::TrailExit { target_pct },
        });
        return;
    }

    let increase = pnl_pct - last_trail_level;
    if p.trail_trigger_pct <= Decimal::ZERO || increase < p.trail_trigger_pct {
        return;
    }
    let intervals = (increase / p.trail_trigger_pct).floor();
    let proposed = target_pct + p.trail_move_pct * intervals;
    let cap = pnl_pct - TRAIL_CAP_BUFFER_PCT;
    let new_target = proposed.min(cap).max(target_pct);

    state.lock = LockState::Locked {
        target_pct: new_target,
        last_trail_level: pnl_pct,
    };
    if new_target > target_pct {
        tracing::info!(
            old_target = %target_pct,
            new_target = %new_target,
            pnl_pct = %pnl_pct.round_dp(2),
            capped = proposed > cap,
            "Profit lock trailed"
        );
        actions.push(RiskAction::LockTarget {
            old_target_pct: Some(target_pct),
            new_target_pct: new_target,
        });
        raise_stop_to_target(state, new_target, actions);
    }
}

fn progressive(
    state: &mut RiskState,
    pnl_pct: Decimal,
    lock_profit_pct: Decimal,
    step_pct: Decimal,
    step_threshold_pct: Decimal,
    actions: &mut Vec<RiskAction>,
) {
    let (mut target_pct, mut next_level_pct) = match state.lock {
        LockState::Escalating {
            target_pct,
            next_level_pct,
        } => (target_pct, next_level_pct),
        LockState::Armed => {
            state.lock = LockState::Escalating {
                target_pct: lock_profit_pct,
                next_level_pct: lock_profit_pct + step_threshold_pct,
            };
            (lock_profit_pct, lock_profit_pct + step_threshold_pct)
        }
        LockState::Locked { .. } => return,
    };

    // One step per observation.
    if pnl_pct >= next_level_pct {
        let old = target_pct;
        target_pct += step_pct;
        next_level_pct += step_threshold_pct;
        state.lock = LockState::Escalating {
            target_pct,
            next_level_pct,
        };
        tracing::info!(
            old_target = %old,
            new_target = %target_pct,
            next_level = %next_level_pct,
            "Profit lock escalated"
        );
        actions.push(RiskAction::LockTarget {
            old_target_pct: Some(old),
            new_target_pct: target_pct,
        });
    }

    if pnl_pct >= target_pct {
        tracing::info!(
            pnl_pct = %pnl_pct.round_dp(2),
            target = %target_pct,
            "Profit lock reached"
        );
        actions.push(RiskAction::Exit {
            reason: ExitReason::ProfitLock,
        });
    }
}

/// Moves the hard stop up to the price that protects `target_pct`.
fn raise_stop_to_target(state: &mut RiskState, target_pct: Decimal, actions: &mut Vec<RiskAction>) {
    let new_stop = price_at_pct(state.entry_price, target_pct);
    if new_stop <= state.stop_price {
        return;
    }
    let old_stop = state.stop_price;
    state.stop_price = new_stop;
    actions.push(RiskAction::RaiseStop {
        old_stop,
        new_stop,
        cause: StopAdjustment::ProfitLock,
    });
}
