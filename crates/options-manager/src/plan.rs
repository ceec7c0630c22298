//! Per-leg parameter resolution.
//!
//! Turns a [`LegConfig`] plus the strategy-level defaults into the concrete
//! parameters a leg runs with. Profit-mode and auto-close fields are read from
//! the leg only; stop, confirmation and breakout-delay fields inherit from the
//! strategy when left unset. An explicitly disabled leg value never inherits.

use std::fmt;
use std::time::Duration;

use breakout_core::{AppConfig, LegConfig, LegId, StrategyConfig, StrikeSelection};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Serialize;

/// Stop percentage used when neither the leg nor the strategy sets one.
const FALLBACK_INITIAL_SL_PCT: Decimal = Decimal::from_parts(7, 0, 0, false, 0);

/// Whole-interval trailing of the hard stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrailingStop {
    pub trigger_pct: Decimal,
    pub move_pct: Decimal,
}

/// Profit capture mode. At most one is active per leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProfitMode {
    None,
    /// Freeze a target at `first_lock_pct` once profit reaches
    /// `lock_trigger_pct`, then trail it upwards.
    LockThenTrail {
        lock_trigger_pct: Decimal,
        first_lock_pct: Decimal,
        trail_trigger_pct: Decimal,
        trail_move_pct: Decimal,
    },
    /// Target starts at `lock_profit_pct` and rises by `step_pct` for every
    /// `step_threshold_pct` of further profit.
    Progressive {
        lock_profit_pct: Decimal,
        step_pct: Decimal,
        step_threshold_pct: Decimal,
    },
    SimpleLock { lock_profit_pct: Decimal },
}

impl ProfitMode {
    /// Picks the mode from whichever leg fields are set, first match wins.
    fn from_leg(leg: &LegConfig) -> Self {
        let first_lock = leg.first_lock_pct.resolve();
        let trail_trigger = leg.trail_trigger_pct.resolve();
        let trail_move = leg.trail_move_pct.resolve();
        let lock_profit = leg.lock_profit_pct.resolve();
        let step = leg.profit_lock_step.resolve();
        let threshold = leg.profit_step_threshold.resolve();

        if let (Some(first_lock_pct), Some(trail_trigger_pct), Some(trail_move_pct)) =
            (first_lock, trail_trigger, trail_move)
        {
            return Self::LockThenTrail {
                lock_trigger_pct: leg.lock_trigger_pct.resolve().unwrap_or(first_lock_pct),
                first_lock_pct,
                trail_trigger_pct,
                trail_move_pct,
            };
        }
        match (lock_profit, step, threshold) {
            (Some(lock_profit_pct), Some(step_pct), Some(step_threshold_pct)) => {
                Self::Progressive {
                    lock_profit_pct,
                    step_pct,
                    step_threshold_pct,
                }
            }
            (Some(lock_profit_pct), _, _) => Self::SimpleLock { lock_profit_pct },
            _ => Self::None,
        }
    }
}

impl fmt::Display for ProfitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::LockThenTrail {
                lock_trigger_pct,
                first_lock_pct,
                trail_trigger_pct,
                trail_move_pct,
            } => write!(
                f,
                "lock {first_lock_pct}% at +{lock_trigger_pct}%, trail {trail_move_pct}% per {trail_trigger_pct}%"
            ),
            Self::Progressive {
                lock_profit_pct,
                step_pct,
                step_threshold_pct,
            } => write!(
                f,
                "progressive from {lock_profit_pct}%, +{step_pct}% per {step_threshold_pct}%"
            ),
            Self::SimpleLock { lock_profit_pct } => write!(f, "exit at +{lock_profit_pct}%"),
        }
    }
}

/// Everything the risk rules need, resolved once per leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskParams {
    pub initial_sl_pct: Decimal,
    pub trailing_stop: Option<TrailingStop>,
    pub profit: ProfitMode,
    pub auto_close_pct: Option<Decimal>,
}

impl RiskParams {
    #[must_use]
    pub fn resolve(leg: &LegConfig, strategy: &StrategyConfig) -> Self {
        let trigger = leg
            .sl_trail_trigger_pct
            .resolve_with(&strategy.sl_trail_trigger_pct);
        let move_pct = leg.sl_trail_move_pct.resolve_with(&strategy.sl_trail_move_pct);

        Self {
            initial_sl_pct: leg
                .initial_sl_pct
                .resolve_with(&strategy.initial_sl_pct)
                .unwrap_or(FALLBACK_INITIAL_SL_PCT),
            trailing_stop: trigger.zip(move_pct).map(|(trigger_pct, move_pct)| TrailingStop {
                trigger_pct,
                move_pct,
            }),
            profit: ProfitMode::from_leg(leg),
            auto_close_pct: leg.auto_close_profit_pct.resolve(),
        }
    }
}

/// Wait-and-trade confirmation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmParams {
    pub threshold_pct: Decimal,
    /// `None` waits until the exit time.
    pub timeout: Option<Duration>,
    /// Retrace from peak that re-arms the reference. `None` disables resets.
    pub reset_drop_pct: Option<Decimal>,
    /// `None` allows unlimited resets.
    pub max_resets: Option<u32>,
}

impl ConfirmParams {
    /// `None` when the leg has no confirmation threshold; it enters directly.
    #[must_use]
    pub fn resolve(leg: &LegConfig, strategy: &StrategyConfig) -> Option<Self> {
        let threshold_pct = leg
            .wait_trade_threshold_pct
            .resolve_with(&strategy.wait_trade_threshold_pct)?;
        let reset_drop_pct = if leg.wait_trade_reset_enabled {
            leg.wait_trade_reset_drop_pct.resolve()
        } else {
            None
        };

        Some(Self {
            threshold_pct,
            timeout: leg
                .wait_trade_timeout_seconds
                .resolve_with(&strategy.wait_trade_timeout_seconds)
                .map(Duration::from_secs),
            reset_drop_pct,
            max_resets: leg.wait_trade_max_resets.resolve(),
        })
    }
}

/// Entry deferral applied when a breakout overshoots the range by too much.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistanceDelay {
    pub threshold: Decimal,
    pub delay: Duration,
}

impl DistanceDelay {
    #[must_use]
    pub fn resolve(leg: &LegConfig, strategy: &StrategyConfig) -> Option<Self> {
        let threshold = leg
            .breakout_diff_threshold
            .resolve_with(&strategy.breakout_diff_threshold)?;
        let delay = leg
            .breakout_diff_delay_seconds
            .resolve_with(&strategy.breakout_diff_delay_seconds)?;
        Some(Self {
            threshold,
            delay: Duration::from_secs(delay),
        })
    }

    /// Whether a breakout of `distance` points must wait.
    #[must_use]
    pub fn applies_to(&self, distance: Decimal) -> bool {
        distance > self.threshold
    }
}

/// A leg with every parameter resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegPlan {
    pub id: LegId,
    pub name: String,
    pub entry_time: NaiveTime,
    /// The leg's own exit time, or the schedule end time.
    pub exit_time: NaiveTime,
    pub strike: StrikeSelection,
    pub lot: u32,
    /// lot size x lot x multiplier; fixed for the whole run.
    pub quantity: u32,
    pub risk: RiskParams,
    pub confirm: Option<ConfirmParams>,
    pub distance_delay: Option<DistanceDelay>,
}

impl LegPlan {
    #[must_use]
    pub fn resolve(id: LegId, leg: &LegConfig, config: &AppConfig) -> Self {
        let strategy = &config.strategy;
        Self {
            id,
            name: leg.name.clone(),
            entry_time: leg.entry_time,
            exit_time: leg.exit_time.unwrap_or(config.schedule.end_time),
            strike: leg.strike_type,
            lot: leg.lot,
            quantity: strategy
                .lot_size
                .saturating_mul(leg.lot)
                .saturating_mul(strategy.lot_multiplier),
            risk: RiskParams::resolve(leg, strategy),
            confirm: ConfirmParams::resolve(leg, strategy),
            distance_delay: DistanceDelay::resolve(leg, strategy),
        }
    }

    /// Plans for every enabled leg. Ids are 1-based configuration positions,
    /// so disabling a leg does not renumber the others.
    #[must_use]
    pub fn all(config: &AppConfig) -> Vec<Self> {
        config
            .legs
            .iter()
            .zip(1..)
            .filter(|(leg, _)| leg.enabled)
            .map(|(leg, id)| Self::resolve(id, leg, config))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakout_core::Setting;
    use rust_decimal_macros::dec;

    fn leg(name: &str) -> LegConfig {
        LegConfig {
            name: name.to_string(),
            ..LegConfig::default()
        }
    }

    fn config_with(legs: Vec<LegConfig>) -> AppConfig {
        AppConfig {
            legs,
            ..AppConfig::default()
        }
    }

    #[test]
    fn quantity_multiplies_lot_size_lot_and_multiplier() {
        let mut l = leg("A");
        l.lot = 2;
        let mut config = config_with(vec![l]);
        config.strategy.lot_multiplier = 3;
        let plan = &LegPlan::all(&config)[0];
        assert_eq!(plan.quantity, 75 * 2 * 3);
    }

    #[test]
    fn exit_time_falls_back_to_schedule_end() {
        let config = config_with(vec![leg("A")]);
        let plan = &LegPlan::all(&config)[0];
        assert_eq!(plan.exit_time, config.schedule.end_time);
    }

    #[test]
    fn ids_follow_configuration_position() {
        let mut off = leg("B");
        off.enabled = false;
        let config = config_with(vec![leg("A"), off, leg("C")]);
        let ids: Vec<_> = LegPlan::all(&config).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn disabled_stop_trailing_does_not_inherit() {
        let mut config = config_with(vec![]);
        config.strategy.sl_trail_trigger_pct = Setting::Value(dec!(5));
        config.strategy.sl_trail_move_pct = Setting::Value(dec!(2));

        let inheriting = leg("A");
        let mut disabled = leg("B");
        disabled.sl_trail_trigger_pct = Setting::Disabled;

        let inherited = RiskParams::resolve(&inheriting, &config.strategy);
        assert_eq!(
            inherited.trailing_stop,
            Some(TrailingStop {
                trigger_pct: dec!(5),
                move_pct: dec!(2)
            })
        );
        assert_eq!(RiskParams::resolve(&disabled, &config.strategy).trailing_stop, None);
    }

    #[test]
    fn initial_stop_cascades_leg_then_strategy_then_fallback() {
        let mut strategy = StrategyConfig::default();
        let mut l = leg("A");
        l.initial_sl_pct = Setting::Value(dec!(4));
        assert_eq!(RiskParams::resolve(&l, &strategy).initial_sl_pct, dec!(4));

        l.initial_sl_pct = Setting::Unset;
        strategy.initial_sl_pct = Setting::Value(dec!(9));
        assert_eq!(RiskParams::resolve(&l, &strategy).initial_sl_pct, dec!(9));

        strategy.initial_sl_pct = Setting::Disabled;
        assert_eq!(RiskParams::resolve(&l, &strategy).initial_sl_pct, dec!(7));
    }

    #[test]
    fn profit_mode_priority() {
        let strategy = StrategyConfig::default();
        let mut l = leg("A");
        l.lock_profit_pct = Setting::Value(dec!(10));
        assert_eq!(
            RiskParams::resolve(&l, &strategy).profit,
            ProfitMode::SimpleLock {
                lock_profit_pct: dec!(10)
            }
        );

        l.profit_lock_step = Setting::Value(dec!(2));
        l.profit_step_threshold = Setting::Value(dec!(5));
        assert!(matches!(
            RiskParams::resolve(&l, &strategy).profit,
            ProfitMode::Progressive { .. }
        ));

        l.first_lock_pct = Setting::Value(dec!(2));
        l.trail_trigger_pct = Setting::Value(dec!(2));
        l.trail_move_pct = Setting::Value(dec!(1));
        assert_eq!(
            RiskParams::resolve(&l, &strategy).profit,
            ProfitMode::LockThenTrail {
                lock_trigger_pct: dec!(2),
                first_lock_pct: dec!(2),
                trail_trigger_pct: dec!(2),
                trail_move_pct: dec!(1),
            }
        );
    }

    #[test]
    fn auto_close_is_leg_only() {
        let strategy = StrategyConfig::default();
        let mut l = leg("A");
        assert_eq!(RiskParams::resolve(&l, &strategy).auto_close_pct, None);
        l.auto_close_profit_pct = Setting::Value(dec!(25));
        assert_eq!(RiskParams::resolve(&l, &strategy).auto_close_pct, Some(dec!(25)));
    }

    #[test]
    fn confirmation_resolution() {
        let strategy = StrategyConfig::default();
        let mut l = leg("A");
        let params = ConfirmParams::resolve(&l, &strategy).unwrap();
        assert_eq!(params.threshold_pct, dec!(3));
        assert_eq!(params.timeout, Some(Duration::from_secs(300)));
        assert_eq!(params.reset_drop_pct, None);

        l.wait_trade_reset_enabled = true;
        l.wait_trade_reset_drop_pct = Setting::Value(dec!(1.5));
        l.wait_trade_max_resets = Setting::Value(4);
        let params = ConfirmParams::resolve(&l, &strategy).unwrap();
        assert_eq!(params.reset_drop_pct, Some(dec!(1.5)));
        assert_eq!(params.max_resets, Some(4));

        l.wait_trade_threshold_pct = Setting::Disabled;
        assert!(ConfirmParams::resolve(&l, &strategy).is_none());
    }

    #[test]
    fn distance_delay_needs_threshold() {
        let mut strategy = StrategyConfig::default();
        let l = leg("A");
        assert!(DistanceDelay::resolve(&l, &strategy).is_none());

        strategy.breakout_diff_threshold = Setting::Value(dec!(40));
        let delay = DistanceDelay::resolve(&l, &strategy).unwrap();
        assert_eq!(delay.delay, Duration::from_secs(60));
        assert!(delay.applies_to(dec!(40.5)));
        assert!(!delay.applies_to(dec!(40)));
    }
}
