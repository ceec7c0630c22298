//! Order placement, modification and cancellation endpoints.

use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::client::OpenAlgoClient;
use crate::error::BrokerError;
use crate::normalize;
use crate::types::OrderRequest;

/// Request body shared by place and modify.
fn order_payload(order: &OrderRequest) -> Value {
    json!({
        "strategy": order.strategy,
        "symbol": order.symbol,
        "exchange": order.exchange,
        "action": order.side.to_string(),
        "pricetype": order.price_type.to_string(),
        "product": order.product,
        "quantity": order.quantity.to_string(),
        "price": price_field(order.price),
        "trigger_price": price_field(order.trigger_price),
    })
}

/// Prices go over the wire as strings, zero when not applicable.
fn price_field(price: Option<Decimal>) -> String {
    price.unwrap_or(Decimal::ZERO).normalize().to_string()
}

impl OpenAlgoClient {
    /// # Errors
    ///
    /// Transport failures, error envelopes, or a success reply without an order id.
    pub async fn submit_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            price_type = %order.price_type,
            "Placing order"
        );
        let body = self.post("placeorder", order_payload(order)).await?;
        normalize::order_id(&body)
            .ok_or_else(|| BrokerError::decode(format!("placeorder returned no order id: {body}")))
    }

    /// # Errors
    ///
    /// Transport failures or error envelopes. Check
    /// [`BrokerError::is_already_terminal`] for orders that already closed.
    pub async fn amend_order(&self, order_id: &str, order: &OrderRequest) -> Result<(), BrokerError> {
        let mut payload = order_payload(order);
        payload["orderid"] = Value::String(order_id.to_string());
        self.post("modifyorder", payload).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Transport failures or error envelopes.
    pub async fn withdraw_order(&self, order_id: &str, strategy: &str) -> Result<(), BrokerError> {
        self.post(
            "cancelorder",
            json!({"orderid": order_id, "strategy": strategy}),
        )
        .await?;
        Ok(())
    }
}
