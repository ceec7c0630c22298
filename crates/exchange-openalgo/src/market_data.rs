//! Quotes, history and expiry endpoints.

use serde_json::json;

use crate::client::OpenAlgoClient;
use crate::error::BrokerError;
use crate::normalize;
use crate::types::{Candle, CandleRequest, Quote};

const DATE_FORMAT: &str = "%Y-%m-%d";

impl OpenAlgoClient {
    /// # Errors
    ///
    /// Transport failures, error envelopes, or a body with no positive LTP.
    pub async fn fetch_quote(&self, symbol: &str, exchange: &str) -> Result<Quote, BrokerError> {
        let body = self
            .post("quotes", json!({"symbol": symbol, "exchange": exchange}))
            .await?;
        normalize::quote(&body)
    }

    /// Historical bars for an inclusive date range.
    ///
    /// # Errors
    ///
    /// Transport failures or error envelopes. No data is an empty vector.
    pub async fn fetch_history(&self, request: &CandleRequest) -> Result<Vec<Candle>, BrokerError> {
        let body = self
            .post(
                "history",
                json!({
                    "symbol": request.symbol,
                    "exchange": request.exchange,
                    "interval": request.interval,
                    "start_date": request.start.format(DATE_FORMAT).to_string(),
                    "end_date": request.end.format(DATE_FORMAT).to_string(),
                }),
            )
            .await?;
        Ok(normalize::candles(&body))
    }

    /// # Errors
    ///
    /// Transport failures or error envelopes.
    pub async fn fetch_expiries(
        &self,
        underlying: &str,
        exchange: &str,
        instrument_type: &str,
    ) -> Result<Vec<String>, BrokerError> {
        let body = self
            .post(
                "expiry",
                json!({
                    "symbol": underlying,
                    "exchange": exchange,
                    "instrumenttype": instrument_type,
                }),
            )
            .await?;
        Ok(normalize::expiries(&body))
    }
}
