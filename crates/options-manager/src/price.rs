//! Price source: streamed prices with quote fallback.
//!
//! A connected stream whose cached value changed recently is authoritative.
//! A value that has not changed for `stale_warn` is logged once; past
//! `stale_fallback` the quote API is used instead until the stream moves
//! again. Quote calls retry transient failures only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use breakout_core::FeedConfig;
use breakout_openalgo::{BrokerApi, StreamingFeed};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSettings {
    pub stale_warn: Duration,
    pub stale_fallback: Duration,
    pub quote_attempts: u32,
    /// Multiplied by the attempt number between retries.
    pub quote_backoff: Duration,
}

impl PriceSettings {
    #[must_use]
    pub fn from_config(feed: &FeedConfig) -> Self {
        Self {
            stale_warn: Duration::from_secs(feed.stale_warn_seconds),
            stale_fallback: Duration::from_secs(feed.stale_fallback_seconds),
            quote_attempts: feed.quote_attempts.max(1),
            quote_backoff: Duration::from_millis(feed.quote_backoff_ms),
        }
    }
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

/// Streaming feed state, for heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Disabled,
    Connected,
    Disconnected,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    Warned,
    FellBack,
}

pub struct PriceSource {
    broker: Arc<dyn BrokerApi>,
    feed: Option<Arc<dyn StreamingFeed>>,
    settings: PriceSettings,
    stale: Mutex<HashMap<String, Staleness>>,
}

impl PriceSource {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        feed: Option<Arc<dyn StreamingFeed>>,
        settings: PriceSettings,
    ) -> Self {
        Self {
            broker,
            feed,
            settings,
            stale: Mutex::new(HashMap::new()),
        }
    }

    /// Requests streamed updates for `symbol`. No-op without a feed.
    pub fn subscribe(&self, symbol: &str, exchange: &str) {
        if let Some(feed) = &self.feed {
            if !feed.subscribe(symbol, exchange) {
                warn!(symbol, exchange, "Stream subscription not queued, will retry on reconnect");
            }
        }
    }

    /// Whether prices are currently coming from a connected stream.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.feed.as_ref().is_some_and(|f| f.is_connected())
    }

    #[must_use]
    pub fn feed_status(&self) -> FeedStatus {
        match &self.feed {
            None => FeedStatus::Disabled,
            Some(feed) if feed.is_connected() => FeedStatus::Connected,
            Some(_) => FeedStatus::Disconnected,
        }
    }

    /// Best available price, or `None` if every source failed.
    pub async fn current_price(&self, symbol: &str, exchange: &str) -> Option<Decimal> {
        if let Some(price) = self.streamed_price(symbol) {
            return Some(price);
        }
        self.quote_with_retry(symbol, exchange).await
    }

    /// Cached stream price if connected and fresh enough to trust.
    fn streamed_price(&self, symbol: &str) -> Option<Decimal> {
        let feed = self.feed.as_ref().filter(|f| f.is_connected())?;
        let tick = feed.last_tick(symbol)?;
        let unchanged_for = tick.changed_at.elapsed();

        let mut stale = self.stale.lock();
        if unchanged_for >= self.settings.stale_fallback {
            if stale.insert(symbol.to_string(), Staleness::FellBack) != Some(Staleness::FellBack) {
                warn!(
                    symbol,
                    unchanged_secs = unchanged_for.as_secs(),
                    "Streamed price stale, falling back to quotes"
                );
            }
            return None;
        }
        if unchanged_for >= self.settings.stale_warn {
            if !stale.contains_key(symbol) {
                stale.insert(symbol.to_string(), Staleness::Warned);
                warn!(
                    symbol,
                    unchanged_secs = unchanged_for.as_secs(),
                    price = %tick.price,
                    "Streamed price unchanged"
                );
            }
        } else if let Some(previous) = stale.remove(symbol) {
            if previous == Staleness::FellBack {
                info!(symbol, price = %tick.price, "Streamed price moving again");
            }
        }
        Some(tick.price)
    }

    /// Quote API with bounded retry for transient errors.
    ///
    /// Non-transient errors fail at once. Never returns an error; callers
    /// treat `None` as "no price this round".
    pub async fn quote_with_retry(&self, symbol: &str, exchange: &str) -> Option<Decimal> {
        let attempts = self.settings.quote_attempts;
        for attempt in 1..=attempts {
            match self.broker.quote(symbol, exchange).await {
                Ok(quote) if quote.ltp > Decimal::ZERO => return Some(quote.ltp),
                Ok(quote) => {
                    debug!(symbol, attempt, ltp = %quote.ltp, "Quote without a usable LTP");
                }
                Err(e) if e.is_transient() => {
                    if attempt == attempts {
                        warn!(symbol, attempts, error = %e, "Quote failed after retries");
                        return None;
                    }
                    debug!(symbol, attempt, error = %e, "Transient quote error, retrying");
                }
                Err(e) => {
                    error!(symbol, error = %e, "Quote failed");
                    return None;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.quote_backoff * attempt).await;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakout_openalgo::testing::{ManualFeed, ScriptedBroker};
    use rust_decimal_macros::dec;
    use tokio::time::Instant;

    const SYMBOL: &str = "NIFTY02DEC2524500CE";

    fn source(broker: Arc<ScriptedBroker>, feed: Option<Arc<ManualFeed>>) -> PriceSource {
        PriceSource::new(
            broker,
            feed.map(|f| f as Arc<dyn StreamingFeed>),
            PriceSettings::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_retries_and_return_none() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.script_quotes(SYMBOL, vec![Err("HTTP 500 from upstream")]);
        let prices = source(broker.clone(), None);

        let started = Instant::now();
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, None);
        assert_eq!(broker.quote_calls(SYMBOL), 3);
        // 0.5s + 1.0s of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_then_success() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.script_quotes(SYMBOL, vec![Err("request timed out"), Ok(dec!(101.5))]);
        let prices = source(broker.clone(), None);
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(101.5)));
        assert_eq!(broker.quote_calls(SYMBOL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_not_retried() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.script_quotes(SYMBOL, vec![Err("Invalid symbol")]);
        let prices = source(broker.clone(), None);
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, None);
        assert_eq!(broker.quote_calls(SYMBOL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_fresh_stream_price() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_quote(SYMBOL, dec!(99));
        let feed = Arc::new(ManualFeed::connected());
        feed.set_price(SYMBOL, dec!(100));
        let prices = source(broker.clone(), Some(feed));

        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(100)));
        assert_eq!(broker.quote_calls(SYMBOL), 0);
        assert_eq!(prices.feed_status(), FeedStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_stream_falls_back_then_recovers() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_quote(SYMBOL, dec!(99));
        let feed = Arc::new(ManualFeed::connected());
        feed.set_price(SYMBOL, dec!(100));
        let prices = source(broker.clone(), Some(feed.clone()));

        // Unchanged for 15s: warned, still streamed.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(100)));
        assert_eq!(broker.quote_calls(SYMBOL), 0);

        // Same value re-sent does not count as fresh.
        feed.set_price(SYMBOL, dec!(100));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(99)));
        assert_eq!(broker.quote_calls(SYMBOL), 1);

        feed.set_price(SYMBOL, dec!(100.5));
        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(100.5)));
        assert_eq!(broker.quote_calls(SYMBOL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_stream_uses_quotes() {
        let broker = Arc::new(ScriptedBroker::new());
        broker.set_quote(SYMBOL, dec!(99));
        let feed = Arc::new(ManualFeed::default());
        feed.set_price(SYMBOL, dec!(100));
        let prices = source(broker, Some(feed));

        assert_eq!(prices.current_price(SYMBOL, "NFO").await, Some(dec!(99)));
        assert_eq!(prices.feed_status(), FeedStatus::Disconnected);
        assert!(!prices.is_streaming());
    }
}
