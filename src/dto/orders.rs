use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::OrderDetails;

/// Order write keyed by `platform_order_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderUpsert {
    pub platform_order_id: String,
    pub customer_id: i64,
    pub marketplace_id: i64,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub order_details: OrderDetails,
}
