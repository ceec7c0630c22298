//! Strike and contract selection.

use breakout_core::{Direction, StrikeSelection};
use breakout_openalgo::{OptionContract, OptionRight};
use rust_decimal::Decimal;

/// Nearest strike to `spot`. Exact midpoints round to the even multiple.
#[must_use]
pub fn atm_strike(spot: Decimal, strike_diff: Decimal) -> Decimal {
    if strike_diff.is_zero() {
        return spot;
    }
    (spot / strike_diff).round() * strike_diff
}

/// Applies the ITM/OTM offset for the traded right.
///
/// Calls are in the money below spot, puts above it.
#[must_use]
pub fn resolve_strike(
    spot: Decimal,
    strike_diff: Decimal,
    selection: StrikeSelection,
    direction: Direction,
) -> Decimal {
    let atm = atm_strike(spot, strike_diff);
    let steps = |n: u32| strike_diff * Decimal::from(n);
    match (selection, OptionRight::from(direction)) {
        (StrikeSelection::Atm, _) => atm,
        (StrikeSelection::Itm(n), OptionRight::Call) | (StrikeSelection::Otm(n), OptionRight::Put) => {
            atm - steps(n)
        }
        (StrikeSelection::Itm(n), OptionRight::Put) | (StrikeSelection::Otm(n), OptionRight::Call) => {
            atm + steps(n)
        }
    }
}

/// The contract a leg trades for a breakout in `direction`.
#[must_use]
pub fn select_contract(
    underlying: &str,
    expiry: &str,
    spot: Decimal,
    strike_diff: Decimal,
    selection: StrikeSelection,
    direction: Direction,
) -> OptionContract {
    let strike = resolve_strike(spot, strike_diff, selection, direction);
    OptionContract::new(underlying, expiry, strike, OptionRight::from(direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn atm_rounds_to_nearest_step() {
        assert_eq!(atm_strike(dec!(24512.3), dec!(50)), dec!(24500));
        assert_eq!(atm_strike(dec!(24526), dec!(50)), dec!(24550));
        // Midpoint goes to the even multiple: 490.5 -> 490.
        assert_eq!(atm_strike(dec!(24525), dec!(50)), dec!(24500));
        assert_eq!(atm_strike(dec!(85149.9), dec!(100)), dec!(85100));
    }

    #[test]
    fn itm_otm_offsets_by_right() {
        let spot = dec!(24512);
        let diff = dec!(50);
        assert_eq!(resolve_strike(spot, diff, StrikeSelection::Itm(2), Direction::Up), dec!(24400));
        assert_eq!(resolve_strike(spot, diff, StrikeSelection::Otm(1), Direction::Up), dec!(24550));
        assert_eq!(resolve_strike(spot, diff, StrikeSelection::Itm(1), Direction::Down), dec!(24550));
        assert_eq!(resolve_strike(spot, diff, StrikeSelection::Otm(3), Direction::Down), dec!(24350));
        assert_eq!(resolve_strike(spot, diff, StrikeSelection::Atm, Direction::Down), dec!(24500));
    }

    #[test]
    fn contract_symbol_for_direction() {
        let contract = select_contract(
            "NIFTY",
            "02DEC25",
            dec!(24512),
            dec!(50),
            StrikeSelection::Atm,
            Direction::Down,
        );
        assert_eq!(contract.symbol(), "NIFTY02DEC2524500PE");
    }
}
