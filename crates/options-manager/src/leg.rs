//! Leg engine: one task per configured leg.
//!
//! A leg moves through `WAITING -> BREAKOUT_CHECK -> CONFIRMING -> ENTERING
//! -> ACTIVE -> CLOSED`, leaving early for `CLOSED` whenever a step cannot
//! continue. Every transition is published as a [`SessionEvent::PhaseChanged`].
//!
//! The position lives behind the leg's own lock. Risk decisions, broker stop
//! updates and the exit itself are applied while holding it, so exactly one
//! path can take a position from active to closed.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use breakout_core::{
    AppConfig, EventRecord, EventSink, ExitReason, LegPhaseKind, LegReport, LegResult,
    MarketClock, SessionEvent,
};
use breakout_openalgo::{OptionContract, OrderState};
use chrono::DateTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::breakout::{check_breakout, ReferenceRange};
use crate::confirm::{await_confirmation, ConfirmationOutcome};
use crate::gateway::{ExitOrder, OrderGateway, StopUpdate};
use crate::ledger::{ExitLedger, LedgerEntry};
use crate::plan::{ConfirmParams, LegPlan};
use crate::price::PriceSource;
use crate::risk;
use crate::signal::StopSignal;
use crate::strike::select_contract;
use crate::types::{pct_change, ExitRecord, Position, RiskAction};

/// Fill differences below this are reported as "at LTP".
const SLIPPAGE_EPSILON: Decimal = dec!(0.01);

/// Session-wide state every leg shares.
pub struct SessionContext {
    pub session_id: String,
    pub config: Arc<AppConfig>,
    pub clock: MarketClock,
    pub prices: Arc<PriceSource>,
    pub gateway: Arc<OrderGateway>,
    pub ledger: Arc<ExitLedger>,
    pub sink: Arc<dyn EventSink>,
    /// Previous session's range, fixed for the run.
    pub reference: ReferenceRange,
    pub expiry: String,
    pub stop: StopSignal,
}

/// Per-leg handle onto the event sink.
#[derive(Clone)]
pub struct LegEvents {
    session_id: String,
    leg_id: u32,
    sink: Arc<dyn EventSink>,
    clock: MarketClock,
}

impl LegEvents {
    #[must_use]
    pub fn new(ctx: &SessionContext, leg_id: u32) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            leg_id,
            sink: Arc::clone(&ctx.sink),
            clock: ctx.clock.clone(),
        }
    }

    #[must_use]
    pub const fn leg_id(&self) -> u32 {
        self.leg_id
    }

    pub fn publish(&self, event: SessionEvent) {
        self.sink.publish(&EventRecord {
            session_id: self.session_id.clone(),
            at: self.clock.now_utc(),
            event,
        });
    }
}

// =============================================================================
// Phases
// =============================================================================

#[derive(Debug)]
enum LegPhase {
    Waiting,
    BreakoutCheck,
    Confirming {
        contract: OptionContract,
        params: ConfirmParams,
    },
    Entering {
        contract: OptionContract,
    },
    Active,
    Closed(LegResult),
}

impl LegPhase {
    const fn kind(&self) -> LegPhaseKind {
        match self {
            Self::Waiting => LegPhaseKind::Waiting,
            Self::BreakoutCheck => LegPhaseKind::BreakoutCheck,
            Self::Confirming { .. } => LegPhaseKind::Confirming,
            Self::Entering { .. } => LegPhaseKind::Entering,
            Self::Active => LegPhaseKind::Active,
            Self::Closed(_) => LegPhaseKind::Closed,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct LegEngine {
    plan: LegPlan,
    ctx: Arc<SessionContext>,
    events: LegEvents,
    tag: String,
    /// Bound once the breakout direction is known.
    symbol: OnceLock<String>,
    position: Mutex<Option<Position>>,
}

impl LegEngine {
    pub fn new(plan: LegPlan, ctx: Arc<SessionContext>) -> Self {
        let events = LegEvents::new(&ctx, plan.id);
        let tag = ctx.gateway.tag_for(&plan.name);
        Self {
            plan,
            ctx,
            events,
            tag,
            symbol: OnceLock::new(),
            position: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn plan(&self) -> &LegPlan {
        &self.plan
    }

    /// Drives the leg to completion. Never fails; problems end up in the
    /// report's result.
    pub async fn run(self) -> LegReport {
        let span = info_span!("leg", id = self.plan.id, name = %self.plan.name);
        self.drive().instrument(span).await
    }

    async fn drive(&self) -> LegReport {
        info!(
            entry_time = %self.plan.entry_time,
            exit_time = %self.plan.exit_time,
            strike = %self.plan.strike,
            quantity = self.plan.quantity,
            initial_sl_pct = %self.plan.risk.initial_sl_pct,
            trailing_stop = ?self.plan.risk.trailing_stop,
            profit = %self.plan.risk.profit,
            auto_close_pct = ?self.plan.risk.auto_close_pct,
            "Leg scheduled"
        );

        let mut phase = LegPhase::Waiting;
        loop {
            let from = phase.kind();
            let next = match phase {
                LegPhase::Waiting => self.wait_for_entry().await,
                LegPhase::BreakoutCheck => self.check_breakout().await,
                LegPhase::Confirming { contract, params } => self.confirm(contract, &params).await,
                LegPhase::Entering { contract } => self.enter(&contract).await,
                LegPhase::Active => self.monitor().await,
                LegPhase::Closed(result) => return self.report(result).await,
            };
            let to = next.kind();
            debug!(%from, %to, "Phase changed");
            self.events.publish(SessionEvent::PhaseChanged {
                leg_id: self.plan.id,
                from,
                to,
            });
            phase = next;
        }
    }

    fn exit_at(&self) -> DateTime<Tz> {
        self.ctx.clock.today_at(self.plan.exit_time)
    }

    fn option_exchange(&self) -> &str {
        &self.ctx.config.strategy.option_exchange
    }

    fn skip(&self, reason: impl Into<String>) -> LegPhase {
        let reason = reason.into();
        warn!(%reason, "Leg skipped");
        self.events.publish(SessionEvent::LegSkipped {
            leg_id: self.plan.id,
            reason: reason.clone(),
        });
        LegPhase::Closed(LegResult::Skipped { reason })
    }

    fn fail(&self, error: impl Into<String>) -> LegPhase {
        let error = error.into();
        error!(%error, "Leg failed");
        self.events.publish(SessionEvent::LegFailed {
            leg_id: self.plan.id,
            error: error.clone(),
        });
        LegPhase::Closed(LegResult::Failed { error })
    }

    // =========================================================================
    // WAITING
    // =========================================================================

    async fn wait_for_entry(&self) -> LegPhase {
        let clock = &self.ctx.clock;
        let entry_at = clock.today_at(self.plan.entry_time);
        let exit_at = self.exit_at();

        if clock.has_passed(exit_at) {
            return self.skip(format!("exit time {} already passed", self.plan.exit_time));
        }

        let heartbeat = Duration::from_secs(self.ctx.config.monitor.heartbeat_seconds.max(1));
        let remaining = clock.until(entry_at);
        if !remaining.is_zero() {
            info!(
                entry_time = %self.plan.entry_time,
                remaining_secs = remaining.as_secs(),
                "Waiting for entry time"
            );
        }
        loop {
            let remaining = clock.until(entry_at);
            if remaining.is_zero() {
                break;
            }
            if !self.ctx.stop.sleep(remaining.min(heartbeat)).await {
                return self.skip("session stopped before entry");
            }
            let remaining = clock.until(entry_at);
            if !remaining.is_zero() {
                info!(remaining_secs = remaining.as_secs(), "Still waiting for entry");
            }
        }
        info!(now = %clock.now().time(), "Entry time reached");

        if clock.has_passed(exit_at) {
            return self.skip(format!("exit time {} already passed", self.plan.exit_time));
        }
        let market = &self.ctx.config.market;
        if market.enforce_hours && !clock.is_market_open(market) {
            return self.skip("market closed");
        }
        LegPhase::BreakoutCheck
    }

    // =========================================================================
    // BREAKOUT_CHECK
    // =========================================================================

    async fn spot(&self) -> Option<Decimal> {
        let strategy = &self.ctx.config.strategy;
        self.ctx
            .prices
            .current_price(&strategy.underlying, &strategy.underlying_exchange)
            .await
    }

    async fn check_breakout(&self) -> LegPhase {
        let range = self.ctx.reference;
        let Some(spot) = self.spot().await else {
            return self.skip("spot price unavailable");
        };
        info!(%spot, high = %range.high, low = %range.low, "Checking breakout");

        let Some(breakout) = check_breakout(spot, &range) else {
            info!(%spot, "No breakout, spot inside range");
            self.events.publish(SessionEvent::NoBreakout {
                leg_id: self.plan.id,
                spot,
            });
            return LegPhase::Closed(LegResult::NoBreakout);
        };
        info!(
            direction = %breakout.direction,
            distance = %breakout.distance,
            "Breakout detected"
        );
        self.events.publish(SessionEvent::BreakoutDetected {
            leg_id: self.plan.id,
            direction: breakout.direction,
            spot,
            distance: breakout.distance,
        });

        if let Some(delay) = self
            .plan
            .distance_delay
            .filter(|d| d.applies_to(breakout.distance))
        {
            info!(
                distance = %breakout.distance,
                threshold = %delay.threshold,
                delay_secs = delay.delay.as_secs(),
                "Breakout overshoot, delaying entry"
            );
            if !self.ctx.stop.sleep(delay.delay).await {
                return self.skip("session stopped during breakout delay");
            }
        }

        // The strike follows spot at selection time, not at detection time.
        let Some(spot) = self.spot().await else {
            return self.fail("spot price unavailable for strike selection");
        };
        let strategy = &self.ctx.config.strategy;
        let contract = select_contract(
            &strategy.underlying,
            &self.ctx.expiry,
            spot,
            strategy.strike_diff,
            self.plan.strike,
            breakout.direction,
        );
        let symbol = self.symbol.get_or_init(|| contract.symbol()).clone();
        info!(%symbol, strike = %contract.strike, %spot, "Strike resolved");
        self.events.publish(SessionEvent::StrikeResolved {
            leg_id: self.plan.id,
            symbol: symbol.clone(),
            strike: contract.strike,
            spot,
        });
        self.ctx.prices.subscribe(&symbol, self.option_exchange());

        match &self.plan.confirm {
            Some(params) => LegPhase::Confirming {
                contract,
                params: params.clone(),
            },
            None => {
                info!("No confirmation threshold, entering directly");
                LegPhase::Entering { contract }
            }
        }
    }

    // =========================================================================
    // CONFIRMING
    // =========================================================================

    async fn confirm(&self, contract: OptionContract, params: &ConfirmParams) -> LegPhase {
        let symbol = contract.symbol();
        let until_exit = self.ctx.clock.until(self.exit_at());
        let window = params.timeout.map_or(until_exit, |t| t.min(until_exit));
        let interval = Duration::from_millis(self.ctx.config.monitor.confirm_interval_ms);

        let outcome = await_confirmation(
            &self.ctx.prices,
            &symbol,
            self.option_exchange(),
            params,
            Instant::now() + window,
            interval,
            &self.ctx.stop,
            |reset| {
                self.events.publish(SessionEvent::ConfirmationReset {
                    leg_id: self.plan.id,
                    reset: reset.number,
                    old_reference: reset.old_reference,
                    new_reference: reset.new_reference,
                    drop_pct: reset.drop_pct,
                });
            },
        )
        .await;

        match outcome {
            ConfirmationOutcome::Confirmed {
                price,
                reference,
                resets,
            } => {
                self.events.publish(SessionEvent::ConfirmationFinished {
                    leg_id: self.plan.id,
                    confirmed: true,
                    reference,
                    last_price: Some(price),
                    resets,
                });
                if self.ctx.clock.has_passed(self.exit_at()) {
                    return self.skip("exit time reached during confirmation");
                }
                LegPhase::Entering { contract }
            }
            ConfirmationOutcome::TimedOut {
                reference,
                last_price,
                resets,
            } => {
                self.events.publish(SessionEvent::ConfirmationFinished {
                    leg_id: self.plan.id,
                    confirmed: false,
                    reference,
                    last_price,
                    resets,
                });
                LegPhase::Closed(LegResult::NotConfirmed)
            }
            ConfirmationOutcome::NoReference => {
                self.skip(format!("no price for {symbol} to confirm against"))
            }
            ConfirmationOutcome::Stopped => self.skip("session stopped during confirmation"),
        }
    }

    // =========================================================================
    // ENTERING
    // =========================================================================

    fn entry_failed(&self, reason: impl Into<String>) -> LegPhase {
        let reason = reason.into();
        error!(%reason, "Entry failed");
        self.events.publish(SessionEvent::LegFailed {
            leg_id: self.plan.id,
            error: format!("entry failed: {reason}"),
        });
        LegPhase::Closed(LegResult::EntryFailed { reason })
    }

    async fn enter(&self, contract: &OptionContract) -> LegPhase {
        let symbol = contract.symbol();
        let quantity = self.plan.quantity;
        let gateway = &self.ctx.gateway;

        let Some(indicative) = self.ctx.prices.current_price(&symbol, self.option_exchange()).await
        else {
            return self.entry_failed(format!("no LTP for {symbol}"));
        };
        info!(%symbol, %indicative, quantity, "Entering position");

        let order_id = match gateway.place_entry(&symbol, quantity, &self.tag).await {
            Ok(order_id) => order_id,
            Err(e) => return self.entry_failed(e.to_string()),
        };

        let entry_price = match gateway
            .resolve_fill_price(&order_id, gateway.settings().fill_timeout)
            .await
        {
            Some(fill) => {
                let slippage = fill - indicative;
                let slippage_pct = pct_change(indicative, fill).round_dp(2);
                if slippage > SLIPPAGE_EPSILON {
                    warn!(%fill, ltp = %indicative, %slippage, %slippage_pct, "Entry slippage");
                } else if slippage < -SLIPPAGE_EPSILON {
                    info!(%fill, ltp = %indicative, %slippage, %slippage_pct, "Filled below LTP");
                } else {
                    info!(%fill, "Filled at LTP");
                }
                fill
            }
            None => {
                warn!(
                    order_id = %order_id,
                    ltp = %indicative,
                    "Fill price unavailable, using LTP as entry price"
                );
                indicative
            }
        };

        let mut position = Position::open(
            symbol.clone(),
            quantity,
            entry_price,
            self.plan.risk.initial_sl_pct,
            self.ctx.clock.now_utc(),
        );
        let stop_price = position.risk.stop_price;
        info!(%entry_price, %stop_price, order_id = %order_id, "Position active");
        self.events.publish(SessionEvent::LegEntered {
            leg_id: self.plan.id,
            leg_name: self.plan.name.clone(),
            symbol: symbol.clone(),
            quantity,
            indicative_price: indicative,
            entry_price,
            stop_price,
            order_id,
        });

        if let Some(stop) = gateway.place_stop(&symbol, quantity, stop_price, &self.tag).await {
            self.events.publish(SessionEvent::StopOrderPlaced {
                leg_id: self.plan.id,
                order_id: stop.order_id.clone(),
                trigger_price: stop.trigger,
                limit_price: stop.limit,
            });
            position.stop_order_id = Some(stop.order_id);
        }

        *self.position.lock().await = Some(position);
        LegPhase::Active
    }

    // =========================================================================
    // ACTIVE
    // =========================================================================

    async fn monitor(&self) -> LegPhase {
        let monitor = &self.ctx.config.monitor;
        let interval = Duration::from_millis(monitor.interval_ms);
        let interval_no_stream = Duration::from_millis(monitor.interval_no_stream_ms);
        let error_retry = Duration::from_millis(monitor.error_retry_ms);
        let heartbeat = Duration::from_secs(monitor.heartbeat_seconds.max(1));
        let exit_at = self.exit_at();
        let Some(symbol) = self.symbol.get().cloned() else {
            return self.fail("active leg without a symbol");
        };

        info!(%symbol, exit_time = %self.plan.exit_time, "Monitoring position");
        let mut last_heartbeat = Instant::now();
        loop {
            if self.ctx.stop.is_stopped() {
                self.close_at_best_price(&symbol, ExitReason::SessionStop).await;
                break;
            }

            let price = self.ctx.prices.current_price(&symbol, self.option_exchange()).await;
            match price {
                Some(price) => {
                    if self.on_price(price).await {
                        break;
                    }
                }
                None => warn!(%symbol, "No price this round"),
            }

            if self.ctx.clock.has_passed(exit_at) {
                info!(exit_time = %self.plan.exit_time, "Exit time reached");
                match price {
                    Some(price) => {
                        self.close_position(price, ExitReason::TimeExit).await;
                    }
                    None => self.close_at_best_price(&symbol, ExitReason::TimeExit).await,
                }
                break;
            }

            if last_heartbeat.elapsed() >= heartbeat {
                self.heartbeat().await;
                last_heartbeat = Instant::now();
            }

            let pause = if price.is_none() {
                error_retry
            } else if self.ctx.prices.is_streaming() {
                interval
            } else {
                interval_no_stream
            };
            // A stop is picked up at the top of the loop.
            self.ctx.stop.sleep(pause).await;
        }
        info!("Monitoring ended");
        LegPhase::Closed(LegResult::Traded)
    }

    /// Fresh price if one can be had, otherwise the last one seen.
    async fn best_price(&self, symbol: &str) -> Option<Decimal> {
        if let Some(price) = self.ctx.prices.current_price(symbol, self.option_exchange()).await {
            return Some(price);
        }
        let guard = self.position.lock().await;
        guard
            .as_ref()
            .map(|p| p.last_price)
            .filter(|p| *p > Decimal::ZERO)
    }

    /// Closes at [`Self::best_price`]. Without any known price nothing is
    /// recorded.
    async fn close_at_best_price(&self, symbol: &str, reason: ExitReason) {
        match self.best_price(symbol).await {
            Some(price) => {
                self.close_position(price, reason).await;
            }
            None => warn!(symbol, %reason, "Exit price unknown, no exit recorded"),
        }
    }

    /// Applies one price observation. Returns `true` once the position is closed.
    async fn on_price(&self, price: Decimal) -> bool {
        let mut guard = self.position.lock().await;
        let Some(position) = guard.as_mut().filter(|p| p.active) else {
            return true;
        };
        position.last_price = price;

        let evaluation = risk::evaluate(&position.risk, price, &self.plan.risk);
        let pnl_pct = evaluation.pnl_pct;
        for action in &evaluation.actions {
            match action {
                RiskAction::RaiseStop {
                    old_stop,
                    new_stop,
                    cause,
                } => {
                    if let Some(order_id) = position.stop_order_id.clone() {
                        let update = self
                            .ctx
                            .gateway
                            .modify_stop(&order_id, &position.symbol, position.quantity, *new_stop, &self.tag)
                            .await;
                        if update == StopUpdate::AlreadyTerminal {
                            warn!(order_id = %order_id, "Broker stop already executed");
                        }
                    }
                    self.events.publish(SessionEvent::StopUpdated {
                        leg_id: self.plan.id,
                        old_stop: *old_stop,
                        new_stop: *new_stop,
                        cause: *cause,
                        pnl_pct,
                    });
                }
                RiskAction::LockTarget {
                    old_target_pct,
                    new_target_pct,
                } => {
                    self.events.publish(SessionEvent::ProfitLockUpdated {
                        leg_id: self.plan.id,
                        old_target_pct: *old_target_pct,
                        new_target_pct: *new_target_pct,
                        pnl_pct,
                    });
                }
                RiskAction::Exit { reason } => {
                    position.risk = evaluation.next;
                    let reason = if *reason == ExitReason::StopLoss
                        && self.broker_stop_filled(position).await
                    {
                        ExitReason::BrokerStopFilled
                    } else {
                        reason.clone()
                    };
                    self.close_locked(position, price, reason).await;
                    return true;
                }
            }
        }
        position.risk = evaluation.next;
        false
    }

    async fn broker_stop_filled(&self, position: &Position) -> bool {
        let Some(order_id) = &position.stop_order_id else {
            return false;
        };
        let filled = self.ctx.gateway.order_state(order_id).await == Some(OrderState::Complete);
        if filled {
            info!(order_id = %order_id, "Stop order already executed at broker, no exit order needed");
        }
        filled
    }

    async fn heartbeat(&self) {
        let guard = self.position.lock().await;
        if let Some(position) = guard.as_ref().filter(|p| p.active) {
            debug!(
                price = %position.last_price,
                pnl_pct = %position.risk.pnl_pct(position.last_price).round_dp(2),
                stop = %position.risk.stop_price.round_dp(2),
                target_pct = ?position.risk.lock.target_pct(),
                peak = %position.risk.highest_price,
                feed = %self.ctx.prices.feed_status(),
                "Position status"
            );
        }
    }

    // =========================================================================
    // CLOSED
    // =========================================================================

    /// Closes the position at `price`. Returns `false` if it was not open,
    /// so concurrent or repeated calls settle exactly once.
    pub async fn close_position(&self, price: Decimal, reason: ExitReason) -> bool {
        let mut guard = self.position.lock().await;
        match guard.as_mut() {
            Some(position) => self.close_locked(position, price, reason).await,
            None => false,
        }
    }

    async fn close_locked(&self, position: &mut Position, price: Decimal, reason: ExitReason) -> bool {
        if !position.active {
            debug!(%reason, "Position already closed, duplicate exit ignored");
            return false;
        }
        let stop_order_id = position.stop_order_id.take();
        let exit_order_id = if reason == ExitReason::BrokerStopFilled {
            None
        } else {
            // Best effort: the stop may already have triggered.
            let stop_cancelled = match stop_order_id {
                Some(order_id) => {
                    self.ctx.gateway.cancel_stop(&order_id, &self.tag).await == StopUpdate::Applied
                }
                None => false,
            };
            self.exit_order(position, stop_cancelled).await
        };

        let pnl = position.pnl_at(price);
        let pnl_pct = position.risk.pnl_pct(price);
        let closed = position.close(ExitRecord {
            price,
            at: self.ctx.clock.now_utc(),
            reason: reason.clone(),
            pnl,
            pnl_pct,
            order_id: exit_order_id.clone(),
        });
        if !closed {
            return false;
        }
        self.ctx.ledger.record(
            self.plan.id,
            LedgerEntry {
                symbol: position.symbol.clone(),
                pnl,
                reason: reason.clone(),
            },
        );

        info!(
            symbol = %position.symbol,
            quantity = position.quantity,
            entry = %position.entry_price,
            exit = %price,
            peak = %position.risk.highest_price,
            final_stop = %position.risk.stop_price.round_dp(2),
            pnl = %pnl.round_dp(2),
            pnl_pct = %pnl_pct.round_dp(2),
            %reason,
            "Position closed"
        );
        self.events.publish(SessionEvent::LegExited {
            leg_id: self.plan.id,
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: price,
            pnl,
            pnl_pct,
            reason,
            exit_order_id,
        });
        true
    }

    /// Sends the exit, retrying once on a transient broker error. If it still
    /// fails, a stop cancelled for this exit is placed again so the broker
    /// position keeps its protection.
    async fn exit_order(&self, position: &Position, stop_cancelled: bool) -> Option<String> {
        let gateway = &self.ctx.gateway;
        let mut outcome = gateway
            .place_exit(&position.symbol, position.quantity, &self.tag)
            .await;
        if let ExitOrder::Failed(e) = &outcome {
            if e.is_transient() {
                warn!(error = %e, "Transient exit order failure, retrying once");
                tokio::time::sleep(self.ctx.config.orders.fill_poll_interval()).await;
                outcome = gateway
                    .place_exit(&position.symbol, position.quantity, &self.tag)
                    .await;
            }
        }

        let error = match outcome {
            ExitOrder::Placed(order_id) => return Some(order_id),
            ExitOrder::PositionAbsent => return None,
            ExitOrder::Failed(e) => e,
        };
        let restored = if stop_cancelled {
            gateway
                .place_stop(&position.symbol, position.quantity, position.risk.stop_price, &self.tag)
                .await
        } else {
            None
        };
        error!(
            error = %error,
            stop_restored = restored.is_some(),
            "Exit order not placed, position may still be open at broker"
        );
        self.events.publish(SessionEvent::ExitOrderFailed {
            leg_id: self.plan.id,
            symbol: position.symbol.clone(),
            error: error.to_string(),
            restored_stop_order_id: restored.map(|stop| stop.order_id),
        });
        None
    }

    async fn report(&self, result: LegResult) -> LegReport {
        let guard = self.position.lock().await;
        let position = guard.as_ref();
        let exit = position.and_then(|p| p.exit.as_ref());
        LegReport {
            leg_id: self.plan.id,
            name: self.plan.name.clone(),
            result,
            symbol: self.symbol.get().cloned(),
            quantity: self.plan.quantity,
            entry_price: position.map(|p| p.entry_price),
            exit_price: exit.map(|e| e.price),
            exit_reason: exit.map(|e| e.reason.clone()),
            pnl: exit.map_or(Decimal::ZERO, |e| e.pnl),
            pnl_pct: exit.map(|e| e.pnl_pct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewaySettings;
    use crate::price::PriceSettings;
    use crate::signal::{stop_channel, StopHandle};
    use breakout_core::{LegConfig, MemorySink, RecoveryQuery, Setting, StopAdjustment};
    use breakout_openalgo::testing::ScriptedBroker;
    use breakout_openalgo::{BrokerError, PriceType, Side};
    use chrono::{NaiveTime, TimeZone, Utc};

    const OPTION: &str = "NIFTY02DEC2524500CE";

    struct Harness {
        broker: Arc<ScriptedBroker>,
        sink: Arc<MemorySink>,
        ctx: Arc<SessionContext>,
        stop: StopHandle,
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn leg(entry: NaiveTime) -> LegConfig {
        LegConfig {
            name: "Leg 1".to_string(),
            entry_time: entry,
            wait_trade_threshold_pct: Setting::Disabled,
            ..LegConfig::default()
        }
    }

    /// Tuesday 2025-12-02, 09:19:50 IST.
    fn harness(config: AppConfig) -> Harness {
        let tz = chrono_tz::Asia::Kolkata;
        let now = tz.with_ymd_and_hms(2025, 12, 2, 9, 19, 50).unwrap();
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_quote("NIFTY", dec!(24512));
        let sink = Arc::new(MemorySink::new());
        let (stop, signal) = stop_channel();
        let config = Arc::new(config);
        let ctx = Arc::new(SessionContext {
            session_id: "test-session".to_string(),
            clock: MarketClock::anchored(tz, now.with_timezone(&Utc)),
            prices: Arc::new(PriceSource::new(
                broker.clone(),
                None,
                PriceSettings::from_config(&config.feed),
            )),
            gateway: Arc::new(OrderGateway::new(
                broker.clone(),
                GatewaySettings::from_config(&config),
            )),
            ledger: Arc::new(ExitLedger::new()),
            sink: sink.clone(),
            reference: ReferenceRange {
                high: dec!(24400),
                low: dec!(24300),
            },
            expiry: "02DEC25".to_string(),
            stop: signal,
            config,
        });
        Harness {
            broker,
            sink,
            ctx,
            stop,
        }
    }

    fn engine(h: &Harness, leg: &LegConfig) -> LegEngine {
        LegEngine::new(LegPlan::resolve(1, leg, &h.ctx.config), Arc::clone(&h.ctx))
    }

    async fn wait_for_stop_order(broker: &ScriptedBroker) -> String {
        loop {
            if let Some((id, _)) = broker.orders_of(PriceType::StopLimit).into_iter().next() {
                return id;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loss_round_trip() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.script_quotes(
            OPTION,
            vec![Ok(dec!(101)), Ok(dec!(100)), Ok(dec!(95)), Ok(dec!(93.05)), Ok(dec!(93))],
        );

        let report = engine(&h, &leg(at(9, 20, 0))).run().await;

        assert_eq!(report.result, LegResult::Traded);
        assert_eq!(report.symbol.as_deref(), Some(OPTION));
        assert_eq!(report.entry_price, Some(dec!(100)));
        assert_eq!(report.exit_price, Some(dec!(93)));
        assert_eq!(report.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(report.pnl, dec!(-525));

        let stop_orders = h.broker.orders_of(PriceType::StopLimit);
        assert_eq!(stop_orders.len(), 1);
        assert_eq!(stop_orders[0].1.trigger_price, Some(dec!(93)));
        assert_eq!(h.broker.cancellations(), vec![stop_orders[0].0.clone()]);
        assert_eq!(h.broker.net_position(OPTION), 0);
        assert_eq!(h.ctx.ledger.total_pnl(), dec!(-525));

        let kinds: Vec<_> = h
            .sink
            .leg_events(1)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PhaseChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                LegPhaseKind::BreakoutCheck,
                LegPhaseKind::Entering,
                LegPhaseKind::Active,
                LegPhaseKind::Closed
            ]
        );
    }

    fn sells(broker: &ScriptedBroker) -> usize {
        broker
            .orders_of(PriceType::Market)
            .into_iter()
            .filter(|(_, o)| o.side == Side::Sell)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn breakout_overshoot_waits_then_uses_fresh_spot() {
        // Spot 24512 is 112 points above the range high.
        let leg = LegConfig {
            breakout_diff_threshold: Setting::Value(dec!(50)),
            breakout_diff_delay_seconds: Setting::Value(60),
            exit_time: Some(at(9, 25, 0)),
            ..leg(at(9, 20, 0))
        };
        let h = harness(AppConfig::default());
        let task = tokio::spawn(engine(&h, &leg).run());

        // Entry time passed at 09:20:00; the delay runs until 09:21:00.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(h.broker.orders().is_empty());
        let events = h.sink.leg_events(1);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::BreakoutDetected { distance, .. } if *distance == dec!(112)
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::StrikeResolved { .. })));

        h.broker.set_quote("NIFTY", dec!(24620));
        h.broker.set_quote("NIFTY02DEC2524600CE", dec!(101));
        h.broker.set_fill_price("NIFTY02DEC2524600CE", dec!(100));
        let report = task.await.unwrap();

        assert_eq!(report.result, LegResult::Traded);
        assert_eq!(report.symbol.as_deref(), Some("NIFTY02DEC2524600CE"));
        assert_eq!(report.entry_price, Some(dec!(100)));
        assert_eq!(report.exit_reason, Some(ExitReason::TimeExit));
        assert!(h.sink.leg_events(1).contains(&SessionEvent::StrikeResolved {
            leg_id: 1,
            symbol: "NIFTY02DEC2524600CE".to_string(),
            strike: dec!(24600),
            spot: dec!(24620),
        }));
        assert!(h.broker.orders().iter().all(|o| o.symbol != OPTION));
    }

    #[tokio::test(start_paused = true)]
    async fn session_stop_during_breakout_delay_skips() {
        let leg = LegConfig {
            breakout_diff_threshold: Setting::Value(dec!(50)),
            breakout_diff_delay_seconds: Setting::Value(60),
            ..leg(at(9, 20, 0))
        };
        let h = harness(AppConfig::default());
        h.broker.set_quote(OPTION, dec!(100));
        let task = tokio::spawn(engine(&h, &leg).run());

        tokio::time::sleep(Duration::from_secs(30)).await;
        h.stop.stop();
        let report = task.await.unwrap();

        assert_eq!(
            report.result,
            LegResult::Skipped {
                reason: "session stopped during breakout delay".to_string()
            }
        );
        assert!(report.symbol.is_none());
        assert!(h.broker.orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exit_failure_is_retried() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.set_quote(OPTION, dec!(100));

        let task = tokio::spawn(engine(&h, &leg(at(9, 20, 0))).run());
        wait_for_stop_order(&h.broker).await;
        h.broker
            .fail_next_orders(vec![BrokerError::Transport("connection reset by peer".into())]);
        h.stop.stop();
        let report = task.await.unwrap();

        assert_eq!(report.exit_reason, Some(ExitReason::SessionStop));
        assert_eq!(sells(&h.broker), 1);
        assert_eq!(h.broker.net_position(OPTION), 0);
        assert!(!h
            .sink
            .leg_events(1)
            .iter()
            .any(|e| matches!(e, SessionEvent::ExitOrderFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_exit_restores_broker_stop() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.set_quote(OPTION, dec!(100));

        let task = tokio::spawn(engine(&h, &leg(at(9, 20, 0))).run());
        let first_stop = wait_for_stop_order(&h.broker).await;
        // Not transient: no second attempt.
        h.broker
            .fail_next_orders(vec![BrokerError::api("Order rejected: RMS margin exceeded")]);
        h.stop.stop();
        task.await.unwrap();

        assert_eq!(sells(&h.broker), 0);
        assert_eq!(h.broker.net_position(OPTION), 75);
        assert_eq!(h.broker.cancellations(), vec![first_stop.clone()]);

        let stops = h.broker.orders_of(PriceType::StopLimit);
        assert_eq!(stops.len(), 2);
        let (restored_id, restored) = &stops[1];
        assert_ne!(restored_id, &first_stop);
        assert_eq!(restored.trigger_price, Some(dec!(93)));

        assert!(h.sink.leg_events(1).contains(&SessionEvent::ExitOrderFailed {
            leg_id: 1,
            symbol: OPTION.to_string(),
            error: BrokerError::api("Order rejected: RMS margin exceeded").to_string(),
            restored_stop_order_id: Some(restored_id.clone()),
        }));
        // Still listed for manual reconciliation.
        let open = h.sink.active_positions_for("test-session").unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, OPTION);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_exit_price_is_not_zero() {
        let h = harness(AppConfig::default());
        let engine = engine(&h, &leg(at(9, 20, 0)));

        // No quote for the option and no position.
        assert_eq!(engine.best_price(OPTION).await, None);
        engine.close_at_best_price(OPTION, ExitReason::SessionStop).await;
        assert_eq!(h.ctx.ledger.closed(), 0);
        assert!(h.sink.leg_events(1).is_empty());

        *engine.position.lock().await = Some(Position::open(
            OPTION.to_string(),
            75,
            dec!(100),
            dec!(7),
            h.ctx.clock.now_utc(),
        ));
        assert_eq!(engine.best_price(OPTION).await, Some(dec!(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn broker_stop_fill_skips_exit_order() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.set_quote(OPTION, dec!(100));

        let task = tokio::spawn(engine(&h, &leg(at(9, 20, 0))).run());
        let stop_id = wait_for_stop_order(&h.broker).await;
        h.broker.set_order_state(&stop_id, OrderState::Complete);
        h.broker.set_quote(OPTION, dec!(90));
        let report = task.await.unwrap();

        assert_eq!(report.exit_reason, Some(ExitReason::BrokerStopFilled));
        assert_eq!(report.pnl, dec!(-750));
        assert_eq!(sells(&h.broker), 0);
        assert!(h.broker.cancellations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_then_trail_moves_broker_stop_and_exits_at_target() {
        let leg = LegConfig {
            lock_trigger_pct: Setting::Value(dec!(4)),
            first_lock_pct: Setting::Value(dec!(2)),
            trail_trigger_pct: Setting::Value(dec!(2)),
            trail_move_pct: Setting::Value(dec!(1)),
            ..leg(at(9, 20, 0))
        };
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.script_quotes(
            OPTION,
            vec![
                Ok(dec!(100)),
                Ok(dec!(100)),
                Ok(dec!(104)),
                Ok(dec!(106)),
                Ok(dec!(108)),
                Ok(dec!(104)),
            ],
        );

        let report = engine(&h, &leg).run().await;

        assert_eq!(
            report.exit_reason,
            Some(ExitReason::TrailExit {
                target_pct: dec!(4)
            })
        );
        assert_eq!(report.pnl, dec!(300));

        let triggers: Vec<_> = h
            .broker
            .modifications()
            .into_iter()
            .filter_map(|(_, o)| o.trigger_price)
            .collect();
        assert_eq!(triggers, vec![dec!(102), dec!(103), dec!(104)]);

        let targets: Vec<_> = h
            .sink
            .leg_events(1)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::ProfitLockUpdated { new_target_pct, .. } => Some(new_target_pct),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![dec!(2), dec!(3), dec!(4)]);
        assert!(h.sink.leg_events(1).iter().all(|e| !matches!(
            e,
            SessionEvent::StopUpdated {
                cause: StopAdjustment::Trailing,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn spot_inside_range_is_no_breakout() {
        let h = harness(AppConfig::default());
        h.broker.set_quote("NIFTY", dec!(24350));

        let report = engine(&h, &leg(at(9, 20, 0))).run().await;

        assert_eq!(report.result, LegResult::NoBreakout);
        assert!(report.symbol.is_none());
        assert!(h.broker.orders().is_empty());
        assert!(h
            .sink
            .leg_events(1)
            .contains(&SessionEvent::NoBreakout {
                leg_id: 1,
                spot: dec!(24350)
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn passed_exit_time_skips_leg() {
        let h = harness(AppConfig::default());
        let leg = LegConfig {
            exit_time: Some(at(9, 15, 0)),
            ..leg(at(9, 10, 0))
        };

        let report = engine(&h, &leg).run().await;

        assert!(matches!(report.result, LegResult::Skipped { .. }));
        assert!(h.broker.orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exit_time_closes_position() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.set_quote(OPTION, dec!(101));
        let leg = LegConfig {
            exit_time: Some(at(9, 21, 0)),
            ..leg(at(9, 20, 0))
        };

        let report = engine(&h, &leg).run().await;

        assert_eq!(report.exit_reason, Some(ExitReason::TimeExit));
        assert_eq!(report.exit_price, Some(dec!(101)));
        assert_eq!(report.pnl, dec!(75));
        assert!(h.ctx.clock.now().time() >= at(9, 21, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn session_stop_closes_active_position() {
        let h = harness(AppConfig::default());
        h.broker.set_fill_price(OPTION, dec!(100));
        h.broker.set_quote(OPTION, dec!(100));

        let task = tokio::spawn(engine(&h, &leg(at(9, 20, 0))).run());
        wait_for_stop_order(&h.broker).await;
        h.stop.stop();
        let report = task.await.unwrap();

        assert_eq!(report.exit_reason, Some(ExitReason::SessionStop));
        assert_eq!(h.broker.net_position(OPTION), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_stop_while_waiting_skips() {
        let h = harness(AppConfig::default());
        let task = tokio::spawn(engine(&h, &leg(at(10, 0, 0))).run());
        tokio::time::sleep(Duration::from_secs(60)).await;
        h.stop.stop();
        let report = task.await.unwrap();
        assert!(matches!(report.result, LegResult::Skipped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_move_does_not_enter() {
        let h = harness(AppConfig::default());
        h.broker.set_quote(OPTION, dec!(100));
        let leg = LegConfig {
            wait_trade_threshold_pct: Setting::Value(dec!(3)),
            wait_trade_timeout_seconds: Setting::Value(10),
            ..leg(at(9, 20, 0))
        };

        let report = engine(&h, &leg).run().await;

        assert_eq!(report.result, LegResult::NotConfirmed);
        assert!(h.broker.orders().is_empty());
        assert!(h.sink.leg_events(1).iter().any(|e| matches!(
            e,
            SessionEvent::ConfirmationFinished {
                confirmed: false,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_entry_fails_leg() {
        let h = harness(AppConfig::default());
        h.broker.set_quote(OPTION, dec!(100));
        h.broker.reject_orders(true);

        let report = engine(&h, &leg(at(9, 20, 0))).run().await;

        assert!(matches!(report.result, LegResult::EntryFailed { .. }));
        assert_eq!(report.pnl, Decimal::ZERO);
        assert!(report.entry_price.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_exits_settle_once() {
        let h = harness(AppConfig::default());
        h.broker.set_quote(OPTION, dec!(105));
        let engine = engine(&h, &leg(at(9, 20, 0)));
        *engine.position.lock().await = Some(Position::open(
            OPTION.to_string(),
            75,
            dec!(100),
            dec!(7),
            h.ctx.clock.now_utc(),
        ));

        let (first, second) = tokio::join!(
            engine.close_position(dec!(105), ExitReason::ProfitLock),
            engine.close_position(dec!(90), ExitReason::StopLoss),
        );

        assert!(first ^ second);
        assert_eq!(h.ctx.ledger.closed(), 1);
        let exits = h
            .sink
            .leg_events(1)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::LegExited { .. }))
            .count();
        assert_eq!(exits, 1);
        assert!(!engine.close_position(dec!(80), ExitReason::TimeExit).await);
    }
}
