//! Order book, trade book and position book endpoints.

use serde_json::json;

use crate::client::OpenAlgoClient;
use crate::error::BrokerError;
use crate::normalize;
use crate::types::{OrderRecord, PositionRecord, TradeRecord};

impl OpenAlgoClient {
    /// # Errors
    ///
    /// Transport failures or error envelopes.
    pub async fn fetch_order_book(&self) -> Result<Vec<OrderRecord>, BrokerError> {
        let body = self.post("orderbook", json!({})).await?;
        Ok(normalize::order_book(&body))
    }

    /// # Errors
    ///
    /// Transport failures or error envelopes.
    pub async fn fetch_trade_book(&self) -> Result<Vec<TradeRecord>, BrokerError> {
        let body = self.post("tradebook", json!({})).await?;
        Ok(normalize::trade_book(&body))
    }

    /// # Errors
    ///
    /// Transport failures or error envelopes.
    pub async fn fetch_position_book(&self) -> Result<Vec<PositionRecord>, BrokerError> {
        let body = self.post("positionbook", json!({})).await?;
        Ok(normalize::position_book(&body))
    }
}

#[cfg(test)]
mod tests {
    use crate::client::test_support::client_for;
    use crate::types::OrderState;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn order_book_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orderbook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"orders": [
                    {"orderid": "1", "order_status": "complete", "price": 0, "averageprice": 101.2}
                ], "statistics": {}}
            })))
            .mount(&server)
            .await;

        let orders = client_for(server.uri()).fetch_order_book().await.unwrap();
        assert_eq!(orders[0].state, OrderState::Complete);
        assert_eq!(orders[0].average_price, Some(dec!(101.2)));
    }

    #[tokio::test]
    async fn empty_position_book() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/positionbook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": []
            })))
            .mount(&server)
            .await;

        let positions = client_for(server.uri()).fetch_position_book().await.unwrap();
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn trade_book_fill_price() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tradebook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": [{"orderid": "7", "average_price": "88.45", "quantity": "75"}]
            })))
            .mount(&server)
            .await;

        let trades = client_for(server.uri()).fetch_trade_book().await.unwrap();
        assert_eq!(trades[0].price, Some(dec!(88.45)));
    }
}
