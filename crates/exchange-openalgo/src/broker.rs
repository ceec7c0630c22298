//! Collaborator boundary consumed by the engine.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::time::Instant;

use crate::error::BrokerError;
use crate::types::{
    Candle, CandleRequest, OrderRecord, OrderRequest, PositionRecord, Quote, TradeRecord,
};

/// Request/response broker API. Implementations return normalized data only.
///
/// A missing order, trade or position is an empty result, never an error.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn quote(&self, symbol: &str, exchange: &str) -> Result<Quote, BrokerError>;

    async fn candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, BrokerError>;

    /// Raw expiry labels, nearest first.
    async fn expiries(
        &self,
        underlying: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>, BrokerError>;

    /// Returns the broker order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError>;

    async fn modify_order(&self, order_id: &str, order: &OrderRequest) -> Result<(), BrokerError>;

    async fn cancel_order(&self, order_id: &str, strategy: &str) -> Result<(), BrokerError>;

    async fn order_book(&self) -> Result<Vec<OrderRecord>, BrokerError>;

    async fn trade_book(&self) -> Result<Vec<TradeRecord>, BrokerError>;

    async fn position_book(&self) -> Result<Vec<PositionRecord>, BrokerError>;
}

/// Latest streamed price for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTick {
    pub price: Decimal,
    /// When any update (changed or not) last arrived.
    pub received_at: Instant,
    /// When the value last differed from the previous one.
    pub changed_at: Instant,
}

/// Push-based price feed with a last-value cache.
pub trait StreamingFeed: Send + Sync {
    /// Requests LTP updates for a symbol. Returns `false` if the request could
    /// not be queued; it is retried automatically on reconnect either way.
    fn subscribe(&self, symbol: &str, exchange: &str) -> bool;

    fn last_tick(&self, symbol: &str) -> Option<StreamTick>;

    fn is_connected(&self) -> bool;

    fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_tick(symbol).map(|t| t.price)
    }
}
