use axum::Router;

use crate::state::AppState;

pub mod doc;
pub mod functions;
pub mod health;

// Build the functions router without binding state; it will be provided at the top level.
pub fn create_functions_router() -> Router<AppState> {
    Router::new().nest("/v1", functions::router())
}
