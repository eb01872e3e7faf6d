use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Connection state of the shared backend handle. The handle connects on
/// first use, so a fresh process reports `idle` until the first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendHealth {
    Connected,
    Idle,
}

#[derive(Serialize, ToSchema)]
pub struct HealthData {
    pub status: String,
    pub backend: BackendHealth,
    pub marketplace_id: i64,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "OK", body = ApiResponse<HealthData>),
    ),
        tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthData>> {
    let backend = if state.backend.is_connected() {
        BackendHealth::Connected
    } else {
        BackendHealth::Idle
    };
    let data = HealthData {
        status: "ok".to_string(),
        backend,
        marketplace_id: state.marketplace_id,
    };

    Json(ApiResponse::success(
        "Health check",
        data,
        Some(Meta::empty()),
    ))
}
