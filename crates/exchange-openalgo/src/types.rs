//! Fixed internal schema for broker data.
//!
//! Everything the engine sees from the broker is one of these types; raw
//! response shapes are mapped in [`crate::normalize`].

use std::fmt;
use std::str::FromStr;

use breakout_core::Direction;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option contract right, in exchange symbol notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl From<Direction> for OptionRight {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => Self::Call,
            Direction::Down => Self::Put,
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "CE"),
            Self::Put => write!(f, "PE"),
        }
    }
}

/// Last traded price snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ltp: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
}

/// One OHLC bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleRequest {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    /// Stop-loss limit.
    #[serde(rename = "SL")]
    StopLimit,
    /// Stop-loss market.
    #[serde(rename = "SL-M")]
    StopMarket,
}

impl PriceType {
    #[must_use]
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::StopLimit | Self::StopMarket)
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopLimit => "SL",
            Self::StopMarket => "SL-M",
        };
        f.write_str(code)
    }
}

impl FromStr for PriceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKET" => Ok(Self::Market),
            "LIMIT" => Ok(Self::Limit),
            "SL" => Ok(Self::StopLimit),
            "SL-M" => Ok(Self::StopMarket),
            other => Err(format!("unknown price type {other:?}")),
        }
    }
}

/// Order placement or modification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Strategy tag shown in the broker's order book.
    pub strategy: String,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub quantity: u32,
    pub price_type: PriceType,
    pub product: String,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
}

/// Normalized order status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Open,
    Complete,
    Rejected,
    Cancelled,
    Other(String),
}

impl OrderState {
    /// Maps the many spellings brokers use.
    #[must_use]
    pub fn from_status(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "complete" | "completed" | "filled" | "executed" | "traded" => Self::Complete,
            "rejected" | "failed" => Self::Rejected,
            "cancelled" | "canceled" => Self::Cancelled,
            "open" | "pending" | "trigger pending" | "trigger_pending" | "validation pending"
            | "put order req received" | "modified" => Self::Open,
            _ => Self::Other(lower),
        }
    }

    #[must_use]
    pub const fn is_filled(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Filled, rejected or cancelled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub symbol: Option<String>,
    pub state: OrderState,
    /// Order-book price. Brokers report zero here for market orders.
    pub price: Option<Decimal>,
    /// Average execution price from any of the alternate fields.
    pub average_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: String,
    pub symbol: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub exchange: Option<String>,
    /// Signed net quantity.
    pub quantity: i64,
}
