//! The `{type, message, token?}` structure every frame on the connection uses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types spoken by the backend.
pub mod kinds {
    pub const LOGIN: &str = "login";
    /// Server push carrying a partial credential to merge into the session.
    pub const UPDATE_TOKEN: &str = "updateToken";
    /// Server push: a newer login for the same user replaced this session.
    pub const SESSION_INVALIDATED: &str = "sessionInvalidated";
    pub const NEW_ORDER: &str = "newOrder";
    pub const GET_ORDERS: &str = "getOrders";
    pub const GET_PRODUCTS: &str = "getProducts";
    pub const GET_PRODUCT: &str = "getProduct";
    pub const NEW_PRODUCT: &str = "newProduct";
    pub const DELETE_PRODUCT: &str = "deleteProduct";
    pub const GET_USERS: &str = "getUsers";
    pub const GET_USER: &str = "getUser";
    pub const NEW_USER: &str = "newUser";
    pub const UPDATE_ORDER_PAYMENT_STATUS: &str = "updateOrderPaymentStatus";
    pub const UPDATE_ORDER_KITCHEN_STATUS: &str = "updateOrderKitchenStatus";
    pub const UPDATE_ORDER_DISCOUNT: &str = "updateOrderDiscount";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `message.status` of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Success,
    Error,
    Warning,
    Info,
    Other(String),
}

impl ReplyStatus {
    fn parse(status: &str) -> Self {
        match status {
            "success" => ReplyStatus::Success,
            "error" => ReplyStatus::Error,
            "warning" => ReplyStatus::Warning,
            "info" => ReplyStatus::Info,
            other => ReplyStatus::Other(other.to_owned()),
        }
    }
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>, message: Value, token: Option<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            message,
            token,
        }
    }

    pub fn is(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    pub fn status(&self) -> Option<ReplyStatus> {
        self.message
            .get("status")
            .and_then(Value::as_str)
            .map(ReplyStatus::parse)
    }

    pub fn is_success(&self) -> bool {
        self.status() == Some(ReplyStatus::Success)
    }

    /// Human-readable text of a reply (`message.message`).
    pub fn text(&self) -> Option<&str> {
        self.message.get("message").and_then(Value::as_str)
    }

    /// Token of the client whose request caused this push (`message.addedByToken`).
    pub fn added_by_token(&self) -> Option<&str> {
        self.message.get("addedByToken").and_then(Value::as_str)
    }
}
