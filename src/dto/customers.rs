use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fields written by the customer form on insert or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomerDraft {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub marketplace_id: i64,
    /// Only sent on first save; updates leave the stored value untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_customer_id: Option<String>,
}

/// Customer write keyed by `(marketplace_id, platform_customer_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomerUpsert {
    pub marketplace_id: i64,
    pub platform_customer_id: String,
    pub full_name: String,
    pub email: String,
}
