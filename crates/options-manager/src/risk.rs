//! Risk manager: one pure decision per price observation.
//!
//! [`evaluate`] never performs I/O. The leg engine applies the returned
//! actions (broker stop modifications, events, exits) under its position lock.

use breakout_core::ExitReason;
use rust_decimal::Decimal;

use crate::plan::RiskParams;
use crate::stops;
use crate::targets;
use crate::types::{RiskAction, RiskState};

/// Outcome of evaluating one price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// State to store if the actions are applied.
    pub next: RiskState,
    /// In application order. An exit, if present, is last.
    pub actions: Vec<RiskAction>,
    pub pnl_pct: Decimal,
}

impl Evaluation {
    #[must_use]
    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.actions.iter().find_map(|action| match action {
            RiskAction::Exit { reason } => Some(reason),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Decides what to do at `price`.
///
/// Checks, in order: the hard stop, auto-close, stop trailing, then the leg's
/// profit mode. A stop breach or auto-close short-circuits everything after it.
#[must_use]
pub fn evaluate(state: &RiskState, price: Decimal, params: &RiskParams) -> Evaluation {
    let mut next = *state;
    if price > next.highest_price {
        next.highest_price = price;
    }
    let pnl_pct = next.pnl_pct(price);
    let mut actions = Vec::new();

    if let Some(reason) = stops::check_stop_breach(&next, price) {
        actions.push(RiskAction::Exit { reason });
        return Evaluation {
            next,
            actions,
            pnl_pct,
        };
    }

    if let Some(reason) = targets::check_auto_close(pnl_pct, params.auto_close_pct) {
        actions.push(RiskAction::Exit { reason });
        return Evaluation {
            next,
            actions,
            pnl_pct,
        };
    }

    if let Some(trailing) = &params.trailing_stop {
        if let Some(action) = stops::trail_stop(&mut next, pnl_pct, trailing) {
            actions.push(action);
        }
    }

    targets::check_profit_targets(&mut next, pnl_pct, &params.profit, &mut actions);

    Evaluation {
        next,
        actions,
        pnl_pct,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ProfitMode, TrailingStop};
    use breakout_core::StopAdjustment;
    use rust_decimal_macros::dec;

    fn params() -> RiskParams {
        RiskParams {
            initial_sl_pct: dec!(7),
            trailing_stop: None,
            profit: ProfitMode::None,
            auto_close_pct: None,
        }
    }

    #[test]
    fn tracks_highest_price_without_acting() {
        let state = RiskState::new(dec!(100), dec!(7));
        let eval = evaluate(&state, dec!(105), &params());
        assert!(eval.is_noop());
        assert_eq!(eval.next.highest_price, dec!(105));
        assert_eq!(eval.pnl_pct, dec!(5));

        let eval = evaluate(&eval.next, dec!(101), &params());
        assert_eq!(eval.next.highest_price, dec!(105));
    }

    #[test]
    fn stop_breach_wins_over_everything() {
        let state = RiskState::new(dec!(100), dec!(7));
        let mut p = params();
        p.profit = ProfitMode::SimpleLock {
            lock_profit_pct: dec!(1),
        };
        let eval = evaluate(&state, dec!(93), &p);
        assert_eq!(eval.exit_reason(), Some(&ExitReason::StopLoss));
        assert_eq!(eval.actions.len(), 1);
    }

    #[test]
    fn auto_close_overrides_profit_modes() {
        let state = RiskState::new(dec!(100), dec!(7));
        let mut p = params();
        p.auto_close_pct = Some(dec!(20));
        p.trailing_stop = Some(TrailingStop {
            trigger_pct: dec!(5),
            move_pct: dec!(2),
        });
        p.profit = ProfitMode::LockThenTrail {
            lock_trigger_pct: dec!(4),
            first_lock_pct: dec!(2),
            trail_trigger_pct: dec!(2),
            trail_move_pct: dec!(1),
        };
        let eval = evaluate(&state, dec!(121), &p);
        assert_eq!(eval.actions, vec![RiskAction::Exit {
            reason: ExitReason::AutoClose { pct: dec!(20) }
        }]);
    }

    #[test]
    fn trailing_and_lock_combine() {
        let state = RiskState::new(dec!(100), dec!(7));
        let mut p = params();
        p.trailing_stop = Some(TrailingStop {
            trigger_pct: dec!(3),
            move_pct: dec!(1),
        });
        p.profit = ProfitMode::LockThenTrail {
            lock_trigger_pct: dec!(4),
            first_lock_pct: dec!(2),
            trail_trigger_pct: dec!(2),
            trail_move_pct: dec!(1),
        };
        let eval = evaluate(&state, dec!(104), &p);
        let causes: Vec<_> = eval
            .actions
            .iter()
            .filter_map(|a| match a {
                RiskAction::RaiseStop { cause, new_stop, .. } => Some((*cause, *new_stop)),
                _ => None,
            })
            .collect();
        assert_eq!(
            causes,
            vec![
                (StopAdjustment::Trailing, dec!(94)),
                (StopAdjustment::ProfitLock, dec!(102)),
            ]
        );
        assert_eq!(eval.next.stop_price, dec!(102));
        assert_eq!(eval.exit_reason(), None);
    }

    #[test]
    fn evaluation_does_not_mutate_input() {
        let state = RiskState::new(dec!(100), dec!(7));
        let mut p = params();
        p.trailing_stop = Some(TrailingStop {
            trigger_pct: dec!(1),
            move_pct: dec!(1),
        });
        let eval = evaluate(&state, dec!(110), &p);
        assert_eq!(state.stop_price, dec!(93));
        assert_eq!(eval.next.stop_price, dec!(103));
    }
}
