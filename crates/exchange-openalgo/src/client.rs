//! OpenAlgo REST client with rate limiting.
//!
//! Every endpoint is a JSON `POST /api/v1/<endpoint>` carrying the API key in
//! the body. Responses pass through [`normalize::check_envelope`] before any
//! endpoint-specific parsing.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use breakout_core::ApiConfig;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use reqwest::Client;
use serde_json::{Map, Value};

use crate::broker::BrokerApi;
use crate::error::BrokerError;
use crate::normalize;
use crate::types::{
    Candle, CandleRequest, OrderRecord, OrderRequest, PositionRecord, Quote, TradeRecord,
};

const API_PREFIX: &str = "/api/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Thin client over the OpenAlgo HTTP API.
pub struct OpenAlgoClient {
    http: Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<Limiter>,
}

impl std::fmt::Debug for OpenAlgoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlgoClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAlgoClient {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed (TLS backend init).
    pub fn new(config: &ApiConfig) -> Result<Self, BrokerError> {
        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(nonzero!(600u32));
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.host.trim_end_matches('/').to_string(),
            api_key: config.key.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
        })
    }

    /// Sets a custom base URL (used by tests against a mock server).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for the rate limiter, posts `payload` plus the API key, and
    /// returns the envelope-checked body.
    pub(crate) async fn post(&self, endpoint: &str, payload: Value) -> Result<Value, BrokerError> {
        self.rate_limiter.until_ready().await;

        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("apikey".to_string(), Value::String(self.api_key.clone()));

        let url = format!("{}{API_PREFIX}/{endpoint}", self.base_url);
        tracing::debug!(endpoint, "POST {}", url);

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Some brokers wrap validation failures in a 4xx with a normal envelope.
            if let Ok(envelope) = serde_json::from_str::<Value>(&text) {
                normalize::check_envelope(envelope)?;
            }
            return Err(BrokerError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| BrokerError::decode(format!("{endpoint}: {e}")))?;
        normalize::check_envelope(value)
    }
}

#[async_trait]
impl BrokerApi for OpenAlgoClient {
    async fn quote(&self, symbol: &str, exchange: &str) -> Result<Quote, BrokerError> {
        self.fetch_quote(symbol, exchange).await
    }

    async fn candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, BrokerError> {
        self.fetch_history(request).await
    }

    async fn expiries(
        &self,
        underlying: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>, BrokerError> {
        self.fetch_expiries(underlying, exchange, instrument_type).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        self.submit_order(order).await
    }

    async fn modify_order(&self, order_id: &str, order: &OrderRequest) -> Result<(), BrokerError> {
        self.amend_order(order_id, order).await
    }

    async fn cancel_order(&self, order_id: &str, strategy: &str) -> Result<(), BrokerError> {
        self.withdraw_order(order_id, strategy).await
    }

    async fn order_book(&self) -> Result<Vec<OrderRecord>, BrokerError> {
        self.fetch_order_book().await
    }

    async fn trade_book(&self) -> Result<Vec<TradeRecord>, BrokerError> {
        self.fetch_trade_book().await
    }

    async fn position_book(&self) -> Result<Vec<PositionRecord>, BrokerError> {
        self.fetch_position_book().await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn client_for(uri: String) -> OpenAlgoClient {
        let config = ApiConfig {
            key: "test-key".to_string(),
            ..ApiConfig::default()
        };
        OpenAlgoClient::new(&config)
            .expect("client builds")
            .with_base_url(uri)
    }
}
