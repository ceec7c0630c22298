//! In-memory broker and feed doubles.
//!
//! Enabled for this crate's tests and, through the `testkit` feature, for
//! downstream crates that drive the engine against scripted prices.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::broker::{BrokerApi, StreamTick, StreamingFeed};
use crate::error::BrokerError;
use crate::types::{
    Candle, CandleRequest, OrderRecord, OrderRequest, OrderState, PositionRecord, PriceType,
    Quote, Side, TradeRecord,
};
use crate::websocket::PriceCache;

/// How a scripted market order reports its fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillReporting {
    /// Order book price is zero; the price is in the trade book.
    #[default]
    TradeBook,
    /// Order book carries the fill price directly.
    OrderPrice,
    /// Only the order's average price field is set.
    AveragePrice,
    /// Order stays open forever.
    Pending,
    Rejected,
}

#[derive(Default)]
struct ScriptState {
    quotes: HashMap<String, VecDeque<Result<Decimal, String>>>,
    quote_calls: HashMap<String, usize>,
    candles: HashMap<NaiveDate, Vec<Candle>>,
    expiries: Vec<String>,
    fill_prices: HashMap<String, Decimal>,
    fill_reporting: FillReporting,
    order_failures: VecDeque<BrokerError>,
    orders: Vec<(OrderRequest, OrderRecord)>,
    modifications: Vec<(String, OrderRequest)>,
    cancellations: Vec<String>,
    trades: Vec<TradeRecord>,
    positions: HashMap<String, i64>,
}

impl ScriptState {
    /// Pops the next scripted step, keeping the last one sticky.
    fn next_quote(&mut self, symbol: &str) -> Option<Result<Decimal, String>> {
        let script = self.quotes.get_mut(symbol)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn current_price(&self, symbol: &str) -> Option<Decimal> {
        self.quotes
            .get(symbol)
            .and_then(|s| s.front())
            .and_then(|step| step.as_ref().ok().copied())
    }
}

/// Broker double with scripted market data and recorded orders.
#[derive(Default)]
pub struct ScriptedBroker {
    state: Mutex<ScriptState>,
    next_id: AtomicU64,
    reject_orders: AtomicBool,
    fail_position_book: AtomicBool,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the quote script with a single sticky price.
    pub fn set_quote(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .quotes
            .insert(symbol.to_string(), VecDeque::from([Ok(price)]));
    }

    /// One step per quote call; the final step repeats. `Err` steps fail
    /// with an API error carrying that message.
    pub fn script_quotes(&self, symbol: &str, steps: Vec<Result<Decimal, &str>>) {
        let steps = steps
            .into_iter()
            .map(|s| s.map_err(str::to_string))
            .collect();
        self.state.lock().quotes.insert(symbol.to_string(), steps);
    }

    pub fn quote_calls(&self, symbol: &str) -> usize {
        self.state.lock().quote_calls.get(symbol).copied().unwrap_or(0)
    }

    pub fn set_candles(&self, date: NaiveDate, candles: Vec<Candle>) {
        self.state.lock().candles.insert(date, candles);
    }

    pub fn set_expiries(&self, expiries: &[&str]) {
        self.state.lock().expiries = expiries.iter().map(|s| (*s).to_string()).collect();
    }

    /// Fill price for market orders on `symbol`, instead of the current quote.
    pub fn set_fill_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().fill_prices.insert(symbol.to_string(), price);
    }

    pub fn set_fill_reporting(&self, reporting: FillReporting) {
        self.state.lock().fill_reporting = reporting;
    }

    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// The next placements fail with these errors, one per order, before
    /// placement goes back to normal.
    pub fn fail_next_orders(&self, errors: Vec<BrokerError>) {
        self.state.lock().order_failures.extend(errors);
    }

    pub fn fail_position_book(&self, fail: bool) {
        self.fail_position_book.store(fail, Ordering::SeqCst);
    }

    pub fn clear_positions(&self) {
        self.state.lock().positions.clear();
    }

    /// Forces an order into `state`, e.g. a stop the exchange triggered.
    pub fn set_order_state(&self, order_id: &str, state: OrderState) {
        let mut guard = self.state.lock();
        if let Some((_, record)) = guard.orders.iter_mut().find(|(_, r)| r.order_id == order_id) {
            record.state = state;
        }
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.state.lock().orders.iter().map(|(o, _)| o.clone()).collect()
    }

    /// Orders placed with `price_type`, oldest first.
    pub fn orders_of(&self, price_type: PriceType) -> Vec<(String, OrderRequest)> {
        self.state
            .lock()
            .orders
            .iter()
            .filter(|(o, _)| o.price_type == price_type)
            .map(|(o, r)| (r.order_id.clone(), o.clone()))
            .collect()
    }

    pub fn modifications(&self) -> Vec<(String, OrderRequest)> {
        self.state.lock().modifications.clone()
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.state.lock().cancellations.clone()
    }

    pub fn net_position(&self, symbol: &str) -> i64 {
        self.state.lock().positions.get(symbol).copied().unwrap_or(0)
    }
}

fn not_pending(order_id: &str) -> BrokerError {
    BrokerError::api(format!("Order {order_id} is not a pending order"))
}

#[async_trait]
impl BrokerApi for ScriptedBroker {
    async fn quote(&self, symbol: &str, _exchange: &str) -> Result<Quote, BrokerError> {
        let mut state = self.state.lock();
        *state.quote_calls.entry(symbol.to_string()).or_default() += 1;
        match state.next_quote(symbol) {
            Some(Ok(ltp)) => Ok(Quote {
                ltp,
                bid: None,
                ask: None,
            }),
            Some(Err(message)) => Err(BrokerError::api(message)),
            None => Err(BrokerError::api(format!("no quote for {symbol}"))),
        }
    }

    async fn candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, BrokerError> {
        Ok(self
            .state
            .lock()
            .candles
            .get(&request.start)
            .cloned()
            .unwrap_or_default())
    }

    async fn expiries(
        &self,
        _underlying: &str,
        _exchange: &str,
        _instrument_type: &str,
    ) -> Result<Vec<String>, BrokerError> {
        Ok(self.state.lock().expiries.clone())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return Err(BrokerError::api("Order rejected: insufficient margin"));
        }

        let mut state = self.state.lock();
        if let Some(error) = state.order_failures.pop_front() {
            return Err(error);
        }
        let order_id = format!("ORD-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut record = OrderRecord {
            order_id: order_id.clone(),
            symbol: Some(order.symbol.clone()),
            state: OrderState::Open,
            price: order.price,
            average_price: None,
            trigger_price: order.trigger_price,
        };

        if order.price_type == PriceType::Market {
            let fill = state
                .fill_prices
                .get(&order.symbol)
                .copied()
                .or_else(|| state.current_price(&order.symbol))
                .unwrap_or(Decimal::ZERO);
            record.price = Some(Decimal::ZERO);

            let reporting = state.fill_reporting;
            match reporting {
                FillReporting::Pending => {}
                FillReporting::Rejected => record.state = OrderState::Rejected,
                reporting => {
                    record.state = OrderState::Complete;
                    match reporting {
                        FillReporting::OrderPrice => record.price = Some(fill),
                        FillReporting::AveragePrice => record.average_price = Some(fill),
                        _ => state.trades.push(TradeRecord {
                            order_id: order_id.clone(),
                            symbol: Some(order.symbol.clone()),
                            price: Some(fill),
                            quantity: Some(Decimal::from(order.quantity)),
                        }),
                    }
                    let signed = match order.side {
                        Side::Buy => i64::from(order.quantity),
                        Side::Sell => -i64::from(order.quantity),
                    };
                    *state.positions.entry(order.symbol.clone()).or_default() += signed;
                }
            }
        }

        state.orders.push((order.clone(), record));
        Ok(order_id)
    }

    async fn modify_order(&self, order_id: &str, order: &OrderRequest) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let (request, record) = state
            .orders
            .iter_mut()
            .find(|(_, r)| r.order_id == order_id && r.state == OrderState::Open)
            .ok_or_else(|| not_pending(order_id))?;
        request.price = order.price;
        request.trigger_price = order.trigger_price;
        record.price = order.price;
        record.trigger_price = order.trigger_price;
        state.modifications.push((order_id.to_string(), order.clone()));
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str, _strategy: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let (_, record) = state
            .orders
            .iter_mut()
            .find(|(_, r)| r.order_id == order_id && r.state == OrderState::Open)
            .ok_or_else(|| not_pending(order_id))?;
        record.state = OrderState::Cancelled;
        state.cancellations.push(order_id.to_string());
        Ok(())
    }

    async fn order_book(&self) -> Result<Vec<OrderRecord>, BrokerError> {
        Ok(self.state.lock().orders.iter().map(|(_, r)| r.clone()).collect())
    }

    async fn trade_book(&self) -> Result<Vec<TradeRecord>, BrokerError> {
        Ok(self.state.lock().trades.clone())
    }

    async fn position_book(&self) -> Result<Vec<PositionRecord>, BrokerError> {
        if self.fail_position_book.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("connection reset by peer".to_string()));
        }
        Ok(self
            .state
            .lock()
            .positions
            .iter()
            .map(|(symbol, quantity)| PositionRecord {
                symbol: symbol.clone(),
                exchange: None,
                quantity: *quantity,
            })
            .collect())
    }
}

// =============================================================================
// Manual Feed
// =============================================================================

/// Streaming feed driven by explicit `set_price` calls.
#[derive(Default)]
pub struct ManualFeed {
    cache: PriceCache,
    connected: AtomicBool,
    subscriptions: Mutex<Vec<(String, String)>>,
}

impl ManualFeed {
    pub fn connected() -> Self {
        let feed = Self::default();
        feed.set_connected(true);
        feed
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.cache.update(symbol, price, Instant::now());
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.subscriptions.lock().clone()
    }
}

impl StreamingFeed for ManualFeed {
    fn subscribe(&self, symbol: &str, exchange: &str) -> bool {
        self.subscriptions
            .lock()
            .push((symbol.to_string(), exchange.to_string()));
        true
    }

    fn last_tick(&self, symbol: &str) -> Option<StreamTick> {
        self.cache.get(symbol)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
