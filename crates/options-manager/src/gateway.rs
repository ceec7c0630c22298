//! Order gateway: entries, guarded exits, fill resolution and the protective
//! stop order of each leg.

use std::sync::Arc;
use std::time::Duration;

use breakout_core::AppConfig;
use breakout_openalgo::{
    BrokerApi, BrokerError, OrderRecord, OrderRequest, OrderState, PriceType, Side, TradeRecord,
};
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Order settings shared by every leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub strategy: String,
    pub exchange: String,
    pub product: String,
    pub price_type: PriceType,
    pub place_stop_orders: bool,
    pub tick_size: Decimal,
    /// Stop limit distance below the trigger, in percent of the trigger.
    pub sl_limit_buffer_pct: Decimal,
    pub fill_timeout: Duration,
    pub fill_poll_interval: Duration,
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let orders = &config.orders;
        let price_type = orders.price_type.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Unknown order price type, using MARKET");
            PriceType::Market
        });
        Self {
            strategy: config.strategy.name.clone(),
            exchange: config.strategy.option_exchange.clone(),
            product: orders.product.clone(),
            price_type,
            place_stop_orders: orders.place_stop_orders,
            tick_size: orders.tick_size,
            sl_limit_buffer_pct: orders.sl_limit_buffer_pct,
            fill_timeout: orders.fill_timeout(),
            fill_poll_interval: orders.fill_poll_interval(),
        }
    }
}

/// Result of an exit order attempt.
#[derive(Debug)]
pub enum ExitOrder {
    Placed(String),
    /// The broker holds no position in the symbol; nothing was sent.
    PositionAbsent,
    Failed(BrokerError),
}

/// Broker-side protective stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOrder {
    pub order_id: String,
    pub trigger: Decimal,
    pub limit: Decimal,
}

/// Result of modifying or cancelling a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopUpdate {
    Applied,
    /// The stop had already executed or closed; nothing left to change.
    AlreadyTerminal,
    Failed,
}

pub struct OrderGateway {
    broker: Arc<dyn BrokerApi>,
    settings: GatewaySettings,
}

impl OrderGateway {
    pub fn new(broker: Arc<dyn BrokerApi>, settings: GatewaySettings) -> Self {
        Self { broker, settings }
    }

    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Order tag for a leg, e.g. `nifty_breakout_Leg_1`.
    #[must_use]
    pub fn tag_for(&self, leg_name: &str) -> String {
        format!("{}_{}", self.settings.strategy, leg_name.replace(' ', "_"))
    }

    #[must_use]
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        let tick = self.settings.tick_size;
        if tick <= Decimal::ZERO {
            return price;
        }
        ((price / tick).round() * tick).normalize()
    }

    /// Trigger and limit for a sell stop at `stop_price`.
    #[must_use]
    pub fn stop_prices(&self, stop_price: Decimal) -> (Decimal, Decimal) {
        let trigger = self.round_to_tick(stop_price);
        let buffer = trigger * self.settings.sl_limit_buffer_pct / Decimal::ONE_HUNDRED;
        let limit = self.round_to_tick(trigger - buffer);
        (trigger, limit)
    }

    fn order(&self, tag: &str, symbol: &str, quantity: u32, side: Side) -> OrderRequest {
        OrderRequest {
            strategy: tag.to_string(),
            symbol: symbol.to_string(),
            exchange: self.settings.exchange.clone(),
            side,
            quantity,
            price_type: self.settings.price_type,
            product: self.settings.product.clone(),
            price: None,
            trigger_price: None,
        }
    }

    fn stop_request(&self, tag: &str, symbol: &str, quantity: u32, stop_price: Decimal) -> OrderRequest {
        let (trigger, limit) = self.stop_prices(stop_price);
        OrderRequest {
            strategy: format!("{tag}_SL"),
            price_type: PriceType::StopLimit,
            price: Some(limit),
            trigger_price: Some(trigger),
            ..self.order(tag, symbol, quantity, Side::Sell)
        }
    }

    // =========================================================================
    // Entry and exit
    // =========================================================================

    /// Places the buy order for a leg.
    pub async fn place_entry(
        &self,
        symbol: &str,
        quantity: u32,
        tag: &str,
    ) -> Result<String, BrokerError> {
        info!(symbol, quantity, tag, "Placing entry order");
        let order_id = self
            .broker
            .place_order(&self.order(tag, symbol, quantity, Side::Buy))
            .await
            .map_err(|e| {
                error!(symbol, error = %e, "Entry order failed");
                e
            })?;
        info!(symbol, order_id = %order_id, "Entry order placed");
        Ok(order_id)
    }

    /// Places the closing sell, unless the broker shows no open position.
    pub async fn place_exit(&self, symbol: &str, quantity: u32, tag: &str) -> ExitOrder {
        if !self.position_exists(symbol).await {
            warn!(symbol, "Exit order skipped: no open position at broker");
            return ExitOrder::PositionAbsent;
        }
        match self
            .broker
            .place_order(&self.order(tag, symbol, quantity, Side::Sell))
            .await
        {
            Ok(order_id) => {
                info!(symbol, quantity, order_id = %order_id, "Exit order placed");
                ExitOrder::Placed(order_id)
            }
            Err(e) => {
                error!(symbol, error = %e, "Exit order failed");
                ExitOrder::Failed(e)
            }
        }
    }

    /// Whether the broker shows a non-zero position in `symbol`.
    ///
    /// Fails open: if the position book cannot be read, assumes it exists.
    pub async fn position_exists(&self, symbol: &str) -> bool {
        match self.broker.position_book().await {
            Ok(positions) => positions
                .iter()
                .any(|p| p.symbol == symbol && p.quantity != 0),
            Err(e) => {
                warn!(symbol, error = %e, "Position book unavailable, assuming position exists");
                true
            }
        }
    }

    // =========================================================================
    // Order status and fills
    // =========================================================================

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, BrokerError> {
        Ok(self
            .broker
            .order_book()
            .await?
            .into_iter()
            .find(|o| o.order_id == order_id))
    }

    /// Current state of an order, `None` if unknown or unreadable.
    pub async fn order_state(&self, order_id: &str) -> Option<OrderState> {
        match self.find_order(order_id).await {
            Ok(order) => order.map(|o| o.state),
            Err(e) => {
                debug!(order_id, error = %e, "Order book unavailable");
                None
            }
        }
    }

    /// Polls until the order fills and returns its execution price.
    ///
    /// Looks at the order's own price, then the trade book, then the average
    /// price fields. `None` on rejection, cancellation or timeout.
    pub async fn resolve_fill_price(&self, order_id: &str, max_wait: Duration) -> Option<Decimal> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.find_order(order_id).await {
                Ok(Some(order)) => match order.state {
                    OrderState::Complete => return self.fill_price_of(&order).await,
                    OrderState::Rejected | OrderState::Cancelled => {
                        warn!(order_id, state = ?order.state, "Order did not fill");
                        return None;
                    }
                    OrderState::Open | OrderState::Other(_) => {}
                },
                Ok(None) => debug!(order_id, "Order not in order book yet"),
                Err(e) => debug!(order_id, error = %e, "Order book unavailable"),
            }
            if Instant::now() + self.settings.fill_poll_interval > deadline {
                debug!(order_id, ?max_wait, "Fill price not available before timeout");
                return None;
            }
            tokio::time::sleep(self.settings.fill_poll_interval).await;
        }
    }

    async fn fill_price_of(&self, order: &OrderRecord) -> Option<Decimal> {
        if let Some(price) = order.price.filter(|p| *p > Decimal::ZERO) {
            debug!(order_id = %order.order_id, %price, "Fill price from order book");
            return Some(price);
        }
        match self.broker.trade_book().await {
            Ok(trades) => {
                if let Some(price) = traded_price(&trades, &order.order_id) {
                    debug!(order_id = %order.order_id, %price, "Fill price from trade book");
                    return Some(price);
                }
            }
            Err(e) => debug!(order_id = %order.order_id, error = %e, "Trade book unavailable"),
        }
        let average = order.average_price.filter(|p| *p > Decimal::ZERO);
        if average.is_none() {
            warn!(order_id = %order.order_id, "Order complete but no fill price reported");
        }
        average
    }

    // =========================================================================
    // Protective stop
    // =========================================================================

    /// Places the leg's sell stop. `None` if stop orders are disabled or the
    /// broker refused it; the local stop still applies either way.
    pub async fn place_stop(
        &self,
        symbol: &str,
        quantity: u32,
        stop_price: Decimal,
        tag: &str,
    ) -> Option<StopOrder> {
        if !self.settings.place_stop_orders {
            return None;
        }
        let request = self.stop_request(tag, symbol, quantity, stop_price);
        let (trigger, limit) = (request.trigger_price?, request.price?);
        match self.broker.place_order(&request).await {
            Ok(order_id) => {
                info!(symbol, order_id = %order_id, %trigger, %limit, "Stop order placed");
                Some(StopOrder {
                    order_id,
                    trigger,
                    limit,
                })
            }
            Err(e) => {
                error!(symbol, %trigger, error = %e, "Stop order failed, relying on local stop");
                None
            }
        }
    }

    pub async fn modify_stop(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: u32,
        new_stop: Decimal,
        tag: &str,
    ) -> StopUpdate {
        let request = self.stop_request(tag, symbol, quantity, new_stop);
        match self.broker.modify_order(order_id, &request).await {
            Ok(()) => {
                info!(
                    order_id,
                    trigger = ?request.trigger_price,
                    limit = ?request.price,
                    "Stop order modified"
                );
                StopUpdate::Applied
            }
            Err(e) if e.is_already_terminal() => {
                info!(order_id, "Stop order already executed, not modified");
                StopUpdate::AlreadyTerminal
            }
            Err(e) => {
                warn!(order_id, error = %e, "Stop order modification failed");
                StopUpdate::Failed
            }
        }
    }

    pub async fn cancel_stop(&self, order_id: &str, tag: &str) -> StopUpdate {
        match self.broker.cancel_order(order_id, &format!("{tag}_SL")).await {
            Ok(()) => {
                info!(order_id, "Stop order cancelled");
                StopUpdate::Applied
            }
            Err(e) if e.is_already_terminal() => {
                info!(order_id, "Stop order already executed or closed");
                StopUpdate::AlreadyTerminal
            }
            Err(e) => {
                warn!(order_id, error = %e, "Stop order cancellation failed");
                StopUpdate::Failed
            }
        }
    }
}

/// Execution price of `order_id` across its trades, quantity-weighted when
/// every trade reports a quantity.
fn traded_price(trades: &[TradeRecord], order_id: &str) -> Option<Decimal> {
    let fills: Vec<(Decimal, Option<Decimal>)> = trades
        .iter()
        .filter(|t| t.order_id == order_id)
        .filter_map(|t| t.price.filter(|p| *p > Decimal::ZERO).map(|p| (p, t.quantity)))
        .collect();

    let (first, _) = *fills.first()?;
    let mut notional = Decimal::ZERO;
    let mut quantity = Decimal::ZERO;
    for (price, qty) in &fills {
        match qty {
            Some(q) if *q > Decimal::ZERO => {
                notional += *price * *q;
                quantity += *q;
            }
            _ => return Some(first),
        }
    }
    Some(notional / quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakout_openalgo::testing::{FillReporting, ScriptedBroker};
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "NIFTY02DEC2524500CE";

    fn gateway(broker: Arc<ScriptedBroker>) -> OrderGateway {
        let settings = GatewaySettings::from_config(&AppConfig::default());
        OrderGateway::new(broker, settings)
    }

    fn setup() -> (Arc<ScriptedBroker>, OrderGateway) {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_quote(SYMBOL, dec!(100));
        (broker.clone(), gateway(broker))
    }

    #[test]
    fn tick_rounding_and_stop_buffer() {
        let (_, gw) = setup();
        assert_eq!(gw.round_to_tick(dec!(93.02)), dec!(93));
        assert_eq!(gw.round_to_tick(dec!(93.03)), dec!(93.05));
        let (trigger, limit) = gw.stop_prices(dec!(93));
        assert_eq!(trigger, dec!(93));
        // 93 - 1.395 = 91.605, rounded to 91.60.
        assert_eq!(limit, dec!(91.6));
    }

    #[test]
    fn leg_tags() {
        let (_, gw) = setup();
        assert_eq!(gw.tag_for("Leg 1"), "nifty_breakout_Leg_1");
    }

    #[tokio::test(start_paused = true)]
    async fn market_fill_resolved_from_trade_book() {
        let (broker, gw) = setup();
        broker.set_fill_price(SYMBOL, dec!(101.25));
        let id = gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        assert_eq!(
            gw.resolve_fill_price(&id, Duration::from_secs(5)).await,
            Some(dec!(101.25))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fill_from_order_price_and_average_fields() {
        let (broker, gw) = setup();
        broker.set_fill_reporting(FillReporting::OrderPrice);
        let id = gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        assert_eq!(gw.resolve_fill_price(&id, Duration::from_secs(5)).await, Some(dec!(100)));

        broker.set_fill_reporting(FillReporting::AveragePrice);
        let id = gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        assert_eq!(gw.resolve_fill_price(&id, Duration::from_secs(5)).await, Some(dec!(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_order_times_out_quietly() {
        let (broker, gw) = setup();
        broker.set_fill_reporting(FillReporting::Pending);
        let id = gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        let started = Instant::now();
        assert_eq!(gw.resolve_fill_price(&id, Duration::from_secs(5)).await, None);
        assert!(started.elapsed() <= Duration::from_secs(5));
        assert!(started.elapsed() >= Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_order_stops_polling() {
        let (broker, gw) = setup();
        broker.set_fill_reporting(FillReporting::Rejected);
        let id = gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        let started = Instant::now();
        assert_eq!(gw.resolve_fill_price(&id, Duration::from_secs(5)).await, None);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn exit_skipped_without_position() {
        let (broker, gw) = setup();
        assert!(matches!(gw.place_exit(SYMBOL, 75, "t").await, ExitOrder::PositionAbsent));
        assert!(broker.orders().is_empty());
    }

    #[tokio::test]
    async fn exit_fails_open_when_position_book_errors() {
        let (broker, gw) = setup();
        broker.fail_position_book(true);
        assert!(matches!(gw.place_exit(SYMBOL, 75, "t").await, ExitOrder::Placed(_)));
        assert_eq!(broker.orders()[0].side, Side::Sell);
    }

    #[tokio::test]
    async fn exit_placed_when_position_open() {
        let (broker, gw) = setup();
        gw.place_entry(SYMBOL, 75, "t").await.unwrap();
        assert!(matches!(gw.place_exit(SYMBOL, 75, "t").await, ExitOrder::Placed(_)));
        assert_eq!(broker.net_position(SYMBOL), 0);
    }

    #[tokio::test]
    async fn stop_lifecycle() {
        let (broker, gw) = setup();
        let stop = gw.place_stop(SYMBOL, 75, dec!(93.01), "leg").await.unwrap();
        assert_eq!(stop.trigger, dec!(93));

        let placed = &broker.orders_of(PriceType::StopLimit)[0].1;
        assert_eq!(placed.strategy, "leg_SL");
        assert_eq!(placed.side, Side::Sell);
        assert_eq!(placed.price, Some(dec!(91.6)));

        assert_eq!(
            gw.modify_stop(&stop.order_id, SYMBOL, 75, dec!(97), "leg").await,
            StopUpdate::Applied
        );
        assert_eq!(broker.modifications()[0].1.trigger_price, Some(dec!(97)));

        broker.set_order_state(&stop.order_id, OrderState::Complete);
        assert_eq!(
            gw.modify_stop(&stop.order_id, SYMBOL, 75, dec!(99), "leg").await,
            StopUpdate::AlreadyTerminal
        );
        assert_eq!(gw.cancel_stop(&stop.order_id, "leg").await, StopUpdate::AlreadyTerminal);
        assert_eq!(gw.order_state(&stop.order_id).await, Some(OrderState::Complete));
    }

    #[tokio::test]
    async fn stops_disabled_places_nothing() {
        let broker = Arc::new(ScriptedBroker::new());
        let mut config = AppConfig::default();
        config.orders.place_stop_orders = false;
        let gw = OrderGateway::new(broker.clone(), GatewaySettings::from_config(&config));
        assert!(gw.place_stop(SYMBOL, 75, dec!(93), "leg").await.is_none());
        assert!(broker.orders().is_empty());
    }

    #[test]
    fn trade_price_weighted_by_quantity() {
        let trade = |price: Decimal, qty: Option<Decimal>| TradeRecord {
            order_id: "1".into(),
            symbol: None,
            price: Some(price),
            quantity: qty,
        };
        let trades = vec![
            trade(dec!(100), Some(dec!(50))),
            trade(dec!(103), Some(dec!(25))),
        ];
        assert_eq!(traded_price(&trades, "1"), Some(dec!(101)));
        assert_eq!(traded_price(&trades, "2"), None);

        let partial = vec![trade(dec!(100), None), trade(dec!(103), Some(dec!(25)))];
        assert_eq!(traded_price(&partial, "1"), Some(dec!(100)));
    }
}
