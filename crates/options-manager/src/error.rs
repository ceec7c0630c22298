use breakout_openalgo::BrokerError;
use thiserror::Error;

/// Startup failures. Nothing after startup aborts the whole session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no enabled legs configured")]
    NoLegs,

    #[error("market is closed")]
    MarketClosed,

    #[error("expiry lookup failed: {0}")]
    Expiry(#[source] BrokerError),

    #[error("broker returned no usable expiry for {underlying}")]
    NoExpiry { underlying: String },

    #[error("no candles for {symbol} in the last {days} days")]
    ReferenceRange { symbol: String, days: u32 },
}
