//! Wire-level request and response types
//!
//! Raw decimal fields are validated at admission; nothing here touches book
//! state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::errors::EngineError;
use types::order::{OrderType, Side};
use types::trade::Trade;

/// Submit a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub id: String,
    pub owner: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: Side,
    /// Required (and positive) for limit orders; ignored otherwise.
    #[serde(default)]
    pub price: Option<Decimal>,
    pub qty: Decimal,
    /// Required (and positive) for stop-loss orders.
    #[serde(default)]
    pub trigger: Option<Decimal>,
}

/// Cancel a live order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub id: String,
    pub owner: String,
}

/// Modify a live order's price and/or quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyOrder {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub new_price: Option<Decimal>,
    #[serde(default)]
    pub new_qty: Option<Decimal>,
}

/// Any request the dispatcher accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRequest {
    Submit(SubmitOrder),
    Cancel(CancelOrder),
    Modify(ModifyOrder),
}

impl OrderRequest {
    pub fn order_id(&self) -> &str {
        match self {
            OrderRequest::Submit(r) => &r.id,
            OrderRequest::Cancel(r) => &r.id,
            OrderRequest::Modify(r) => &r.id,
        }
    }
}

/// Response to a submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub order_id: String,
    pub trades: Vec<Trade>,
    pub error: Option<EngineError>,
}

/// Response to a cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub accepted: bool,
    pub error: Option<EngineError>,
}

/// Response to a modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyResponse {
    pub accepted: bool,
    pub trades: Vec<Trade>,
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineResponse {
    Submit(SubmitResponse),
    Cancel(CancelResponse),
    Modify(ModifyResponse),
}
