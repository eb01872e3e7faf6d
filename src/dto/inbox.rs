use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::SenderType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub content: String,
    pub sender_type: SenderType,
}
