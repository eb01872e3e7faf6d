use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::sync::SyncResponse,
    error::{AppResult, ErrorBody},
    services::sync_service::{MarketplaceSync, SYNC_SUCCESS_MESSAGE},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/sync-marketplace-data",
        post(sync_marketplace_data).get(sync_marketplace_data),
    )
}

#[utoipa::path(
    post,
    path = "/functions/v1/sync-marketplace-data",
    responses(
        (status = 200, description = "Orders synchronized", body = SyncResponse),
        (status = 500, description = "Synchronization aborted", body = ErrorBody),
    ),
    tag = "Functions"
)]
pub async fn sync_marketplace_data(State(state): State<AppState>) -> AppResult<Json<SyncResponse>> {
    tracing::info!("sync-marketplace-data invoked");

    let mut sync = MarketplaceSync::new(
        state.backend.as_ref(),
        state.order_source.as_ref(),
        state.marketplace_id,
    );
    sync.run().await?;

    Ok(Json(SyncResponse {
        message: SYNC_SUCCESS_MESSAGE.to_string(),
    }))
}
