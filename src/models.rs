use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Marketplace {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub marketplace_id: i64,
    #[serde(default)]
    pub platform_customer_id: Option<String>,
}

/// Conversation row with the owning customer's display name embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummary {
    pub id: i64,
    pub subject: Option<String>,
    pub status: String,
    pub customer_id: i64,
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Customer,
    Agent,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "customer" => Some(SenderType::Customer),
            "agent" => Some(SenderType::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: i64,
    pub content: Option<String>,
    pub sender_type: SenderType,
    pub sent_at: DateTime<Utc>,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductLine {
    pub name: String,
    pub quantity: i32,
    pub price: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderDetails {
    pub products: Vec<ProductLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: i64,
    pub platform_order_id: String,
    pub customer_id: i64,
    pub marketplace_id: i64,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub order_details: OrderDetails,
}
