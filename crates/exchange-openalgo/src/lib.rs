//! OpenAlgo broker integration.
//!
//! REST client for quotes, history, expiries and orders, a streaming LTP feed,
//! a paper broker, and the [`BrokerApi`]/[`StreamingFeed`] traits the engine
//! depends on. Raw broker responses are normalized here and nowhere else.

pub mod account;
pub mod broker;
pub mod client;
pub mod error;
pub mod execution;
pub mod market_data;
pub mod normalize;
pub mod options_chain;
pub mod paper;
pub mod types;
pub mod websocket;

#[cfg(any(test, feature = "testkit"))]
pub mod testing;

pub use broker::{BrokerApi, StreamTick, StreamingFeed};
pub use client::OpenAlgoClient;
pub use error::BrokerError;
pub use options_chain::{expiry_tag, OptionContract};
pub use paper::PaperBroker;
pub use types::{
    Candle, CandleRequest, OptionRight, OrderRecord, OrderRequest, OrderState, PositionRecord,
    PriceType, Quote, Side, TradeRecord,
};
pub use websocket::{LtpStream, LtpStreamConfig, PriceCache};
