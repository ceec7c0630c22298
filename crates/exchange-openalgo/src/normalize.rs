//! Response normalization.
//!
//! OpenAlgo brokers disagree on envelope layout, key names, and whether
//! numbers are numbers or strings. These functions map every shape seen in
//! practice onto the types in [`crate::types`] so nothing downstream has to
//! probe for alternate keys.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::BrokerError;
use crate::types::{Candle, OrderRecord, OrderState, PositionRecord, Quote, TradeRecord};

const ORDER_ID_KEYS: &[&str] = &["orderid", "order_id", "orderId"];
const STATUS_KEYS: &[&str] = &["order_status", "orderstatus", "status", "Status"];
const ORDER_ALT_PRICE_KEYS: &[&str] = &["averageprice", "average_price", "avgprice", "filled_price"];
const TRADE_PRICE_KEYS: &[&str] = &[
    "averageprice",
    "average_price",
    "avgprice",
    "price",
    "fillprice",
    "fill_price",
    "tradeprice",
];
const SYMBOL_KEYS: &[&str] = &["symbol", "tradingsymbol", "Symbol"];
const QUANTITY_KEYS: &[&str] = &["quantity", "netqty", "Quantity"];

/// Fails on `status: error` envelopes, passing anything else through.
///
/// # Errors
///
/// Returns [`BrokerError::Api`] carrying the envelope's message.
pub fn check_envelope(body: Value) -> Result<Value, BrokerError> {
    match body.get("status").and_then(Value::as_str) {
        Some(status) if status.eq_ignore_ascii_case("error") => {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(BrokerError::api(message))
        }
        _ => Ok(body),
    }
}

/// Accepts `{data: {ltp}}`, `{ltp}` and `{data: [{ltp}]}`.
///
/// # Errors
///
/// Returns [`BrokerError::Decode`] when no positive LTP is present.
pub fn quote(body: &Value) -> Result<Quote, BrokerError> {
    let candidates = [
        body.get("data"),
        Some(body),
        body.get("data").and_then(|d| d.get(0)),
    ];
    for node in candidates.into_iter().flatten() {
        if let Some(ltp) = decimal(node, &["ltp"]).filter(|p| *p > Decimal::ZERO) {
            return Ok(Quote {
                ltp,
                bid: decimal(node, &["bid"]),
                ask: decimal(node, &["ask"]),
            });
        }
    }
    Err(BrokerError::decode(format!("no ltp in quote response: {body}")))
}

/// Rows from `data[]` or `data.candles[]`. An empty list is not an error.
#[must_use]
pub fn candles(body: &Value) -> Vec<Candle> {
    rows(body, "candles")
        .iter()
        .filter_map(|row| {
            Some(Candle {
                timestamp: row.get("timestamp").and_then(timestamp),
                open: decimal(row, &["open"])?,
                high: decimal(row, &["high"])?,
                low: decimal(row, &["low"])?,
                close: decimal(row, &["close"])?,
                volume: decimal(row, &["volume"]).unwrap_or_default(),
            })
        })
        .collect()
}

#[must_use]
pub fn expiries(body: &Value) -> Vec<String> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Order id from the top level or from `data`.
#[must_use]
pub fn order_id(body: &Value) -> Option<String> {
    string(body, ORDER_ID_KEYS).or_else(|| body.get("data").and_then(|d| string(d, ORDER_ID_KEYS)))
}

#[must_use]
pub fn order_book(body: &Value) -> Vec<OrderRecord> {
    rows(body, "orders")
        .iter()
        .filter_map(|row| {
            Some(OrderRecord {
                order_id: string(row, ORDER_ID_KEYS)?,
                symbol: string(row, SYMBOL_KEYS),
                state: string(row, STATUS_KEYS)
                    .map_or_else(|| OrderState::Other(String::new()), |s| OrderState::from_status(&s)),
                price: decimal(row, &["price"]),
                average_price: decimal(row, ORDER_ALT_PRICE_KEYS),
                trigger_price: decimal(row, &["trigger_price", "triggerprice"]),
            })
        })
        .collect()
}

#[must_use]
pub fn trade_book(body: &Value) -> Vec<TradeRecord> {
    rows(body, "trades")
        .iter()
        .filter_map(|row| {
            Some(TradeRecord {
                order_id: string(row, ORDER_ID_KEYS)?,
                symbol: string(row, SYMBOL_KEYS),
                price: first_positive(row, TRADE_PRICE_KEYS),
                quantity: decimal(row, &["quantity", "filledqty", "filled_quantity"]),
            })
        })
        .collect()
}

#[must_use]
pub fn position_book(body: &Value) -> Vec<PositionRecord> {
    rows(body, "positions")
        .iter()
        .filter_map(|row| {
            let quantity = decimal(row, QUANTITY_KEYS)
                .and_then(|q| q.trunc().to_string().parse::<i64>().ok())
                .unwrap_or(0);
            Some(PositionRecord {
                symbol: string(row, SYMBOL_KEYS)?,
                exchange: string(row, &["exchange"]),
                quantity,
            })
        })
        .collect()
}

// =============================================================================
// Field helpers
// =============================================================================

/// Row list from `data` (array) or `data.<nested>` (array).
fn rows<'a>(body: &'a Value, nested: &str) -> &'a [Value] {
    let data = body.get("data");
    data.and_then(Value::as_array)
        .or_else(|| data.and_then(|d| d.get(nested)).and_then(Value::as_array))
        .map_or(&[], Vec::as_slice)
}

fn string(node: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match node.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First key holding a number or a numeric string.
fn decimal(node: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| parse_decimal(node.get(*k)?))
}

/// Like [`decimal`], skipping zero placeholders.
fn first_positive(node: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .find_map(|k| parse_decimal(node.get(*k)?).filter(|p| *p > Decimal::ZERO))
}

pub(crate) fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_i64()?;
            // Millisecond epochs show up from some brokers.
            let secs = if secs > 10_000_000_000 { secs / 1000 } else { secs };
            Utc.timestamp_opt(secs, 0).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        _ => None,
    }
}
