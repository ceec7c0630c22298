//! Reference range and breakout detection.

use breakout_core::Direction;
use breakout_openalgo::Candle;
use rust_decimal::Decimal;
use serde::Serialize;

/// Previous session's high and low over the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceRange {
    pub high: Decimal,
    pub low: Decimal,
}

impl ReferenceRange {
    /// High and low of the last `lookback` candles. `None` if there are none.
    #[must_use]
    pub fn from_candles(candles: &[Candle], lookback: usize) -> Option<Self> {
        let start = candles.len().saturating_sub(lookback);
        let window = candles.get(start..)?;
        let high = window.iter().map(|c| c.high).max()?;
        let low = window.iter().map(|c| c.low).min()?;
        Some(Self { high, low })
    }
}

/// A detected breakout of the reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Breakout {
    pub direction: Direction,
    /// Points beyond the broken level.
    pub distance: Decimal,
    pub spot: Decimal,
}

/// Compares spot to the range. Touching a level is not a breakout.
#[must_use]
pub fn check_breakout(spot: Decimal, range: &ReferenceRange) -> Option<Breakout> {
    if spot > range.high {
        Some(Breakout {
            direction: Direction::Up,
            distance: spot - range.high,
            spot,
        })
    } else if spot < range.low {
        Some(Breakout {
            direction: Direction::Down,
            distance: range.low - spot,
            spot,
        })
    } else {
        None
    }
}
