//! Paper trading broker.
//!
//! Market data comes from a real [`BrokerApi`]; orders, trades and positions
//! are simulated in memory. Market orders fill immediately at the current
//! quote. Stop orders rest until a quote crosses their trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::broker::BrokerApi;
use crate::error::BrokerError;
use crate::types::{
    Candle, CandleRequest, OrderRecord, OrderRequest, OrderState, PositionRecord, PriceType,
    Quote, Side, TradeRecord,
};

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    record: OrderRecord,
}

#[derive(Debug, Default)]
struct PaperState {
    orders: Vec<PaperOrder>,
    trades: Vec<TradeRecord>,
    /// Net quantity by symbol.
    positions: HashMap<String, (String, i64)>,
}

impl PaperState {
    fn find_mut(&mut self, order_id: &str) -> Option<&mut PaperOrder> {
        self.orders.iter_mut().find(|o| o.record.order_id == order_id)
    }

    fn fill(&mut self, index: usize, price: Decimal) {
        let order = &mut self.orders[index];
        order.record.state = OrderState::Complete;
        order.record.average_price = Some(price);
        let request = order.request.clone();
        let order_id = order.record.order_id.clone();

        self.trades.push(TradeRecord {
            order_id,
            symbol: Some(request.symbol.clone()),
            price: Some(price),
            quantity: Some(Decimal::from(request.quantity)),
        });

        let signed = match request.side {
            Side::Buy => i64::from(request.quantity),
            Side::Sell => -i64::from(request.quantity),
        };
        let entry = self
            .positions
            .entry(request.symbol.clone())
            .or_insert_with(|| (request.exchange.clone(), 0));
        entry.1 += signed;
    }
}

fn not_pending(order_id: &str) -> BrokerError {
    BrokerError::api(format!("Order {order_id} is not a pending order"))
}

// =============================================================================
// Paper Broker
// =============================================================================

/// Simulated order handling over live market data.
pub struct PaperBroker {
    market: Arc<dyn BrokerApi>,
    state: Mutex<PaperState>,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(market: Arc<dyn BrokerApi>) -> Self {
        Self {
            market,
            state: Mutex::new(PaperState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Every order placed so far, oldest first.
    #[must_use]
    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().orders.iter().map(|o| o.request.clone()).collect()
    }

    /// Fills a resting stop at `price`, as if the exchange triggered it.
    ///
    /// Returns `false` if the order is unknown or no longer open.
    pub fn fill_stop(&self, order_id: &str, price: Decimal) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state
            .orders
            .iter()
            .position(|o| o.record.order_id == order_id && o.record.state == OrderState::Open)
        else {
            return false;
        };
        state.fill(index, price);
        tracing::info!(order_id, %price, "Paper stop filled");
        true
    }

    /// Fills resting sell stops whose trigger the price has reached.
    fn trigger_stops(&self, symbol: &str, ltp: Decimal) {
        let mut state = self.state.lock();
        let triggered: Vec<usize> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| {
                o.record.state == OrderState::Open
                    && o.request.symbol == symbol
                    && o.request.side == Side::Sell
                    && o.request.price_type.is_stop()
                    && o.request.trigger_price.is_some_and(|t| ltp <= t)
            })
            .map(|(i, _)| i)
            .collect();
        for index in triggered {
            let id = state.orders[index].record.order_id.clone();
            state.fill(index, ltp);
            tracing::info!(order_id = %id, %ltp, "Paper stop triggered");
        }
    }

    fn next_order_id(&self) -> String {
        format!("PAPER-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl BrokerApi for PaperBroker {
    async fn quote(&self, symbol: &str, exchange: &str) -> Result<Quote, BrokerError> {
        let quote = self.market.quote(symbol, exchange).await?;
        self.trigger_stops(symbol, quote.ltp);
        Ok(quote)
    }

    async fn candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, BrokerError> {
        self.market.candles(request).await
    }

    async fn expiries(
        &self,
        underlying: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>, BrokerError> {
        self.market.expiries(underlying, exchange, instrument_type).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        let fill_price = match order.price_type {
            PriceType::Market => Some(self.market.quote(&order.symbol, &order.exchange).await?.ltp),
            PriceType::Limit | PriceType::StopLimit | PriceType::StopMarket => None,
        };

        let order_id = self.next_order_id();
        let record = OrderRecord {
            order_id: order_id.clone(),
            symbol: Some(order.symbol.clone()),
            state: OrderState::Open,
            // Brokers report zero here for market orders; mirror that.
            price: Some(order.price.unwrap_or(Decimal::ZERO)),
            average_price: None,
            trigger_price: order.trigger_price,
        };

        let mut state = self.state.lock();
        state.orders.push(PaperOrder {
            request: order.clone(),
            record,
        });
        if let Some(price) = fill_price {
            let index = state.orders.len() - 1;
            state.fill(index, price);
        }

        tracing::info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            price_type = %order.price_type,
            fill = ?fill_price,
            "Paper order placed"
        );
        Ok(order_id)
    }

    async fn modify_order(&self, order_id: &str, order: &OrderRequest) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let paper = state
            .find_mut(order_id)
            .filter(|o| o.record.state == OrderState::Open)
            .ok_or_else(|| not_pending(order_id))?;
        paper.request.price = order.price;
        paper.request.trigger_price = order.trigger_price;
        paper.record.price = order.price;
        paper.record.trigger_price = order.trigger_price;
        Ok(())
    }

    async fn cancel_order(&self, order_id: &str, _strategy: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let paper = state
            .find_mut(order_id)
            .filter(|o| o.record.state == OrderState::Open)
            .ok_or_else(|| not_pending(order_id))?;
        paper.record.state = OrderState::Cancelled;
        Ok(())
    }

    async fn order_book(&self) -> Result<Vec<OrderRecord>, BrokerError> {
        Ok(self.state.lock().orders.iter().map(|o| o.record.clone()).collect())
    }

    async fn trade_book(&self) -> Result<Vec<TradeRecord>, BrokerError> {
        Ok(self.state.lock().trades.clone())
    }

    async fn position_book(&self) -> Result<Vec<PositionRecord>, BrokerError> {
        Ok(self
            .state
            .lock()
            .positions
            .iter()
            .map(|(symbol, (exchange, quantity))| PositionRecord {
                symbol: symbol.clone(),
                exchange: Some(exchange.clone()),
                quantity: *quantity,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBroker;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "NIFTY02DEC2524500CE";

    fn order(side: Side, price_type: PriceType, trigger: Option<Decimal>) -> OrderRequest {
        OrderRequest {
            strategy: "paper".into(),
            symbol: SYMBOL.into(),
            exchange: "NFO".into(),
            side,
            quantity: 75,
            price_type,
            product: "NRML".into(),
            price: trigger.map(|t| t - dec!(1)),
            trigger_price: trigger,
        }
    }

    fn broker_at(price: Decimal) -> (Arc<ScriptedBroker>, PaperBroker) {
        let market = Arc::new(ScriptedBroker::new());
        market.set_quote(SYMBOL, price);
        (market.clone(), PaperBroker::new(market))
    }

    #[tokio::test]
    async fn market_order_fills_at_quote() {
        let (_, paper) = broker_at(dec!(100));
        let id = paper.place_order(&order(Side::Buy, PriceType::Market, None)).await.unwrap();

        let book = paper.order_book().await.unwrap();
        assert_eq!(book[0].order_id, id);
        assert_eq!(book[0].state, OrderState::Complete);
        assert_eq!(book[0].price, Some(Decimal::ZERO));

        let trades = paper.trade_book().await.unwrap();
        assert_eq!(trades[0].price, Some(dec!(100)));

        let positions = paper.position_book().await.unwrap();
        assert_eq!(positions[0].quantity, 75);
    }

    #[tokio::test]
    async fn stop_rests_until_triggered_by_quote() {
        let (market, paper) = broker_at(dec!(100));
        paper.place_order(&order(Side::Buy, PriceType::Market, None)).await.unwrap();
        let stop = paper
            .place_order(&order(Side::Sell, PriceType::StopLimit, Some(dec!(93))))
            .await
            .unwrap();

        paper.quote(SYMBOL, "NFO").await.unwrap();
        let open = paper.order_book().await.unwrap();
        assert_eq!(open[1].state, OrderState::Open);

        market.set_quote(SYMBOL, dec!(92.5));
        paper.quote(SYMBOL, "NFO").await.unwrap();
        let book = paper.order_book().await.unwrap();
        let filled = book.iter().find(|o| o.order_id == stop).unwrap();
        assert_eq!(filled.state, OrderState::Complete);
        assert_eq!(paper.position_book().await.unwrap()[0].quantity, 0);
    }

    #[tokio::test]
    async fn modify_after_fill_is_already_terminal() {
        let (_, paper) = broker_at(dec!(100));
        let stop = paper
            .place_order(&order(Side::Sell, PriceType::StopLimit, Some(dec!(93))))
            .await
            .unwrap();
        paper
            .modify_order(&stop, &order(Side::Sell, PriceType::StopLimit, Some(dec!(95))))
            .await
            .unwrap();
        assert_eq!(paper.order_book().await.unwrap()[0].trigger_price, Some(dec!(95)));

        assert!(paper.fill_stop(&stop, dec!(95)));
        let err = paper
            .modify_order(&stop, &order(Side::Sell, PriceType::StopLimit, Some(dec!(97))))
            .await
            .unwrap_err();
        assert!(err.is_already_terminal());
        assert!(paper.cancel_order(&stop, "paper").await.unwrap_err().is_already_terminal());
    }
}
