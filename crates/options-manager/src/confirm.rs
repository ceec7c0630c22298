//! Wait-and-trade entry confirmation.
//!
//! After a breakout the traded option itself must rise by a threshold from a
//! reference price before the leg enters. With resets enabled, a retrace of
//! `reset_drop_pct` from the running peak re-arms the reference at the
//! retraced price instead of abandoning the wait.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::plan::ConfirmParams;
use crate::price::PriceSource;
use crate::signal::StopSignal;
use crate::types::{pct_change, price_at_pct};

/// Progress logs while confirming are at most this frequent.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// A re-armed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reset {
    /// 1-based count of resets so far.
    pub number: u32,
    pub old_reference: Decimal,
    pub new_reference: Decimal,
    pub peak: Decimal,
    pub drop_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Confirmed,
    Reset(Reset),
    Pending,
}

/// Pure confirmation state, fed one price at a time.
#[derive(Debug, Clone)]
pub struct ConfirmationTracker {
    threshold_pct: Decimal,
    reset_drop_pct: Option<Decimal>,
    max_resets: Option<u32>,
    reference: Decimal,
    peak: Decimal,
    resets: u32,
    last_price: Option<Decimal>,
}

impl ConfirmationTracker {
    #[must_use]
    pub fn new(reference: Decimal, params: &ConfirmParams) -> Self {
        Self {
            threshold_pct: params.threshold_pct,
            reset_drop_pct: params.reset_drop_pct,
            max_resets: params.max_resets,
            reference,
            peak: reference,
            resets: 0,
            last_price: None,
        }
    }

    #[must_use]
    pub const fn reference(&self) -> Decimal {
        self.reference
    }

    #[must_use]
    pub fn target(&self) -> Decimal {
        price_at_pct(self.reference, self.threshold_pct)
    }

    #[must_use]
    pub const fn resets(&self) -> u32 {
        self.resets
    }

    #[must_use]
    pub const fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    fn can_reset(&self) -> bool {
        self.max_resets.map_or(true, |max| self.resets < max)
    }

    /// Feeds one price. A retrace is checked before the threshold, so a
    /// retraced price never confirms against the old reference.
    pub fn observe(&mut self, price: Decimal) -> Observation {
        self.last_price = Some(price);
        if price > self.peak {
            self.peak = price;
        }

        if let Some(reset_drop_pct) = self.reset_drop_pct.filter(|_| self.can_reset()) {
            let drop_pct = if self.peak.is_zero() {
                Decimal::ZERO
            } else {
                (self.peak - price) / self.peak * Decimal::ONE_HUNDRED
            };
            if drop_pct > Decimal::ZERO && drop_pct >= reset_drop_pct {
                self.resets += 1;
                let reset = Reset {
                    number: self.resets,
                    old_reference: self.reference,
                    new_reference: price,
                    peak: self.peak,
                    drop_pct,
                };
                self.reference = price;
                self.peak = price;
                return Observation::Reset(reset);
            }
        }

        if price >= self.target() {
            Observation::Confirmed
        } else {
            Observation::Pending
        }
    }
}

/// How the confirmation wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed {
        price: Decimal,
        reference: Decimal,
        resets: u32,
    },
    TimedOut {
        reference: Decimal,
        last_price: Option<Decimal>,
        resets: u32,
    },
    /// No starting price could be read.
    NoReference,
    Stopped,
}

/// Polls `symbol` until confirmed, `deadline` passes, or a stop arrives.
///
/// `on_reset` is called for every re-armed reference.
#[allow(clippy::too_many_arguments)]
pub async fn await_confirmation(
    prices: &PriceSource,
    symbol: &str,
    exchange: &str,
    params: &ConfirmParams,
    deadline: Instant,
    interval: Duration,
    stop: &StopSignal,
    mut on_reset: impl FnMut(&Reset),
) -> ConfirmationOutcome {
    let Some(reference) = prices.current_price(symbol, exchange).await else {
        warn!(symbol, "No starting price for confirmation");
        return ConfirmationOutcome::NoReference;
    };
    let mut tracker = ConfirmationTracker::new(reference, params);
    info!(
        symbol,
        %reference,
        target = %tracker.target().round_dp(2),
        threshold_pct = %params.threshold_pct,
        reset_drop_pct = ?params.reset_drop_pct,
        "Waiting for confirmation"
    );

    let mut last_log = Instant::now();
    loop {
        if let Some(price) = prices.current_price(symbol, exchange).await {
            match tracker.observe(price) {
                Observation::Confirmed => {
                    info!(
                        symbol,
                        reference = %tracker.reference(),
                        %price,
                        move_pct = %pct_change(tracker.reference(), price).round_dp(2),
                        resets = tracker.resets(),
                        "Confirmation threshold reached"
                    );
                    return ConfirmationOutcome::Confirmed {
                        price,
                        reference: tracker.reference(),
                        resets: tracker.resets(),
                    };
                }
                Observation::Reset(reset) => {
                    warn!(
                        symbol,
                        reset = reset.number,
                        peak = %reset.peak,
                        drop_pct = %reset.drop_pct.round_dp(2),
                        old_reference = %reset.old_reference,
                        new_reference = %reset.new_reference,
                        "Confirmation reference reset"
                    );
                    on_reset(&reset);
                }
                Observation::Pending => {
                    if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                        debug!(
                            symbol,
                            %price,
                            target = %tracker.target().round_dp(2),
                            move_pct = %pct_change(tracker.reference(), price).round_dp(2),
                            resets = tracker.resets(),
                            remaining_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                            "Confirming"
                        );
                        last_log = Instant::now();
                    }
                }
            }
        }

        if Instant::now() >= deadline {
            warn!(
                symbol,
                reference = %tracker.reference(),
                last_price = ?tracker.last_price(),
                resets = tracker.resets(),
                "Confirmation timed out, entry skipped"
            );
            return ConfirmationOutcome::TimedOut {
                reference: tracker.reference(),
                last_price: tracker.last_price(),
                resets: tracker.resets(),
            };
        }
        if !stop.sleep(interval).await {
            info!(symbol, "Confirmation interrupted by session stop");
            return ConfirmationOutcome::Stopped;
        }
    }
}
