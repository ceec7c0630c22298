//! Session coordinator.
//!
//! Fetches the once-per-run inputs (contract expiry, previous session range),
//! then runs one [`LegEngine`] task per enabled leg and joins them all before
//! producing the summary. A failing or panicking leg never affects the others.

use std::sync::Arc;

use breakout_core::{
    AppConfig, EventRecord, EventSink, LegReport, LegResult, MarketClock, SessionEvent,
    SessionStatus, SessionSummary,
};
use breakout_openalgo::{expiry_tag, BrokerApi, CandleRequest, StreamingFeed};
use chrono::Days;
use tracing::{debug, error, info, warn};

use crate::breakout::ReferenceRange;
use crate::error::SessionError;
use crate::gateway::{GatewaySettings, OrderGateway};
use crate::leg::{LegEngine, SessionContext};
use crate::ledger::ExitLedger;
use crate::plan::LegPlan;
use crate::price::{PriceSettings, PriceSource};
use crate::signal::StopSignal;

pub struct SessionCoordinator {
    session_id: String,
    config: Arc<AppConfig>,
    broker: Arc<dyn BrokerApi>,
    feed: Option<Arc<dyn StreamingFeed>>,
    clock: MarketClock,
    sink: Arc<dyn EventSink>,
    stop: StopSignal,
}

impl SessionCoordinator {
    pub fn new(
        config: AppConfig,
        broker: Arc<dyn BrokerApi>,
        sink: Arc<dyn EventSink>,
        clock: MarketClock,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            config: Arc::new(config),
            broker,
            feed: None,
            clock,
            sink,
            stop: StopSignal::never(),
        }
    }

    /// Prefer streamed prices from `feed`.
    #[must_use]
    pub fn with_feed(mut self, feed: Arc<dyn StreamingFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    #[must_use]
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn publish(&self, event: SessionEvent) {
        self.sink.publish(&EventRecord {
            session_id: self.session_id.clone(),
            at: self.clock.now_utc(),
            event,
        });
    }

    /// Nearest expiry in symbol form, e.g. `02DEC25`.
    pub async fn fetch_expiry(&self) -> Result<String, SessionError> {
        let strategy = &self.config.strategy;
        let expiries = self
            .broker
            .expiries(
                &strategy.underlying,
                &strategy.option_exchange,
                &strategy.instrument_type,
            )
            .await
            .map_err(SessionError::Expiry)?;

        let expiry = expiries
            .first()
            .and_then(|raw| expiry_tag(raw))
            .ok_or_else(|| SessionError::NoExpiry {
                underlying: strategy.underlying.clone(),
            })?;
        info!(%expiry, raw = ?expiries.first(), "Expiry resolved");
        Ok(expiry)
    }

    /// Range of the most recent earlier day with candles, walking back over
    /// weekends and holidays.
    pub async fn fetch_reference_range(&self) -> Result<ReferenceRange, SessionError> {
        let strategy = &self.config.strategy;
        let today = self.clock.today();
        for days_back in 1..=strategy.history_lookback_days {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(days_back))) else {
                break;
            };
            let request = CandleRequest {
                symbol: strategy.underlying.clone(),
                exchange: strategy.underlying_exchange.clone(),
                interval: strategy.candle_interval.clone(),
                start: date,
                end: date,
            };
            let candles = match self.broker.candles(&request).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(%date, error = %e, "Candle request failed");
                    continue;
                }
            };
            match ReferenceRange::from_candles(&candles, strategy.lookback_candles) {
                Some(range) => {
                    info!(
                        %date,
                        candles = candles.len(),
                        lookback = strategy.lookback_candles,
                        high = %range.high,
                        low = %range.low,
                        "Reference range resolved"
                    );
                    return Ok(range);
                }
                None => debug!(%date, "No candles, likely a holiday or weekend"),
            }
        }
        Err(SessionError::ReferenceRange {
            symbol: strategy.underlying.clone(),
            days: strategy.history_lookback_days,
        })
    }

    /// Runs the whole session. Errors only for startup failures.
    pub async fn run(self) -> Result<SessionSummary, SessionError> {
        let started_at = self.clock.now_utc();
        let plans = LegPlan::all(&self.config);
        if plans.is_empty() {
            return Err(SessionError::NoLegs);
        }
        let market = &self.config.market;
        if market.enforce_hours && !self.clock.is_market_open(market) {
            warn!(now = %self.clock.now(), "Market closed, session not started");
            return Err(SessionError::MarketClosed);
        }

        let expiry = self.fetch_expiry().await?;
        let reference = self.fetch_reference_range().await?;
        let strategy = &self.config.strategy;

        let prices = Arc::new(PriceSource::new(
            Arc::clone(&self.broker),
            self.feed.clone(),
            PriceSettings::from_config(&self.config.feed),
        ));
        prices.subscribe(&strategy.underlying, &strategy.underlying_exchange);
        let ledger = Arc::new(ExitLedger::new());
        let ctx = Arc::new(SessionContext {
            session_id: self.session_id.clone(),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
            prices,
            gateway: Arc::new(OrderGateway::new(
                Arc::clone(&self.broker),
                GatewaySettings::from_config(&self.config),
            )),
            ledger: Arc::clone(&ledger),
            sink: Arc::clone(&self.sink),
            reference,
            expiry: expiry.clone(),
            stop: self.stop.clone(),
        });

        info!(
            session_id = %self.session_id,
            strategy = %strategy.name,
            underlying = %strategy.underlying,
            %expiry,
            high = %reference.high,
            low = %reference.low,
            legs = plans.len(),
            mode = %self.config.orders.mode,
            "Session started"
        );
        self.publish(SessionEvent::SessionStarted {
            strategy: strategy.name.clone(),
            underlying: strategy.underlying.clone(),
            expiry: expiry.clone(),
            strike_diff: strategy.strike_diff,
            lot_size: strategy.lot_size,
            reference_high: reference.high,
            reference_low: reference.low,
            legs: plans.len(),
        });

        let tasks: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let identity = (plan.id, plan.name.clone(), plan.quantity);
                let engine = LegEngine::new(plan, Arc::clone(&ctx));
                (identity, tokio::spawn(engine.run()))
            })
            .collect();

        let mut legs = Vec::with_capacity(tasks.len());
        for ((leg_id, name, quantity), task) in tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    error!(leg_id, leg = %name, error = %e, "Leg task aborted");
                    let error = e.to_string();
                    self.publish(SessionEvent::LegFailed {
                        leg_id,
                        error: error.clone(),
                    });
                    LegReport {
                        leg_id,
                        name,
                        result: LegResult::Failed { error },
                        symbol: None,
                        quantity,
                        entry_price: None,
                        exit_price: None,
                        exit_reason: None,
                        pnl: ledger.get(leg_id).map(|e| e.pnl).unwrap_or_default(),
                        pnl_pct: None,
                    }
                }
            };
            info!(
                leg_id,
                leg = %report.name,
                result = report.result.label(),
                pnl = %report.pnl.round_dp(2),
                "Leg finished"
            );
            legs.push(report);
        }

        let total_pnl = ledger.total_pnl();
        self.publish(SessionEvent::SessionClosed {
            status: SessionStatus::Completed,
            total_pnl,
        });
        info!(
            total_pnl = %total_pnl.round_dp(2),
            closed = ledger.closed(),
            "All legs completed"
        );

        Ok(SessionSummary {
            session_id: self.session_id.clone(),
            strategy: strategy.name.clone(),
            underlying: strategy.underlying.clone(),
            expiry,
            reference_high: reference.high,
            reference_low: reference.low,
            started_at,
            finished_at: self.clock.now_utc(),
            status: SessionStatus::Completed,
            legs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakout_core::{
        ExitReason, LegConfig, MemorySink, RecoveryQuery, Setting, StrikeSelection,
    };
    use breakout_openalgo::testing::ScriptedBroker;
    use breakout_openalgo::Candle;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal) -> Candle {
        Candle {
            timestamp: None,
            open: low,
            high,
            low,
            close: high,
            volume: dec!(1000),
        }
    }

    fn clock(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> MarketClock {
        let tz = chrono_tz::Asia::Kolkata;
        let local = tz.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap();
        MarketClock::anchored(tz, local.with_timezone(&Utc))
    }

    fn leg(name: &str, entry: NaiveTime) -> LegConfig {
        LegConfig {
            name: name.to_string(),
            entry_time: entry,
            wait_trade_threshold_pct: Setting::Disabled,
            ..LegConfig::default()
        }
    }

    fn config(legs: Vec<LegConfig>) -> AppConfig {
        AppConfig {
            legs,
            ..AppConfig::default()
        }
    }

    fn broker_with_history(date: NaiveDate) -> Arc<ScriptedBroker> {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_expiries(&["02-DEC-25", "09-DEC-25"]);
        broker.set_candles(
            date,
            vec![
                candle(dec!(24900), dec!(24100)),
                candle(dec!(24400), dec!(24320)),
                candle(dec!(24380), dec!(24300)),
                candle(dec!(24360), dec!(24310)),
            ],
        );
        broker
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn reference_range_skips_weekend() {
        // Monday; Friday 2025-11-28 is the last day with data.
        let broker = broker_with_history(NaiveDate::from_ymd_opt(2025, 11, 28).unwrap());
        let coordinator = SessionCoordinator::new(
            config(vec![leg("Leg 1", at(9, 20, 0))]),
            broker,
            Arc::new(MemorySink::new()),
            clock(2025, 12, 1, 9, 16, 0),
        );

        let range = coordinator.fetch_reference_range().await.unwrap();
        // Only the last three candles count.
        assert_eq!(range.high, dec!(24400));
        assert_eq!(range.low, dec!(24300));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_history_aborts_startup() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_expiries(&["02-DEC-25"]);
        let coordinator = SessionCoordinator::new(
            config(vec![leg("Leg 1", at(9, 20, 0))]),
            broker,
            Arc::new(MemorySink::new()),
            clock(2025, 12, 2, 9, 16, 0),
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SessionError::ReferenceRange { days: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_expiry_aborts_startup() {
        let broker = broker_with_history(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        broker.set_expiries(&[]);
        let coordinator = SessionCoordinator::new(
            config(vec![leg("Leg 1", at(9, 20, 0))]),
            broker,
            Arc::new(MemorySink::new()),
            clock(2025, 12, 2, 9, 16, 0),
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SessionError::NoExpiry { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn weekend_is_market_closed() {
        let coordinator = SessionCoordinator::new(
            config(vec![leg("Leg 1", at(9, 20, 0))]),
            Arc::new(ScriptedBroker::new()),
            Arc::new(MemorySink::new()),
            clock(2025, 12, 6, 10, 0, 0),
        );
        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SessionError::MarketClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn runs_legs_concurrently_and_totals_pnl() {
        let broker = broker_with_history(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        broker.set_quote("NIFTY", dec!(24512));
        broker.set_quote("NIFTY02DEC2524500CE", dec!(100));
        broker.set_fill_price("NIFTY02DEC2524500CE", dec!(100));
        broker.set_quote("NIFTY02DEC2524450CE", dec!(150));
        broker.set_fill_price("NIFTY02DEC2524450CE", dec!(150));

        let legs = vec![
            LegConfig {
                exit_time: Some(at(9, 25, 0)),
                ..leg("Leg 1", at(9, 20, 0))
            },
            LegConfig {
                strike_type: StrikeSelection::Itm(1),
                exit_time: Some(at(9, 30, 0)),
                ..leg("Leg 2", at(9, 22, 0))
            },
            LegConfig {
                enabled: false,
                ..leg("Leg 3", at(9, 20, 0))
            },
            LegConfig {
                exit_time: Some(at(9, 17, 0)),
                ..leg("Leg 4", at(9, 16, 30))
            },
        ];
        let sink = Arc::new(MemorySink::new());
        let coordinator = SessionCoordinator::new(
            config(legs),
            broker.clone(),
            sink.clone(),
            clock(2025, 12, 2, 9, 18, 0),
        );
        let session_id = coordinator.session_id().to_string();

        // Leg 1 gains 10%, leg 2 stays flat until its time exit.
        let bump = {
            let broker = broker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(4 * 60)).await;
                broker.set_quote("NIFTY02DEC2524500CE", dec!(110));
            })
        };
        let summary = coordinator.run().await.unwrap();
        bump.await.unwrap();

        assert_eq!(summary.expiry, "02DEC25");
        assert_eq!(summary.legs.len(), 3);
        let ids: Vec<_> = summary.legs.iter().map(|l| l.leg_id).collect();
        assert_eq!(ids, vec![1, 2, 4]);

        let leg1 = &summary.legs[0];
        assert_eq!(leg1.exit_reason, Some(ExitReason::TimeExit));
        assert_eq!(leg1.pnl, dec!(750));
        let leg2 = &summary.legs[1];
        assert_eq!(leg2.symbol.as_deref(), Some("NIFTY02DEC2524450CE"));
        assert_eq!(leg2.pnl, Decimal::ZERO);
        assert!(matches!(summary.legs[2].result, LegResult::Skipped { .. }));

        assert_eq!(summary.total_pnl(), dec!(750));
        assert_eq!(summary.traded(), 2);
        assert!(matches!(
            sink.events().last(),
            Some(SessionEvent::SessionClosed {
                status: SessionStatus::Completed,
                ..
            })
        ));
        assert!(sink.sessions_still_running().unwrap().is_empty());
        assert!(sink.active_positions_for(&session_id).unwrap().is_empty());
    }
}
