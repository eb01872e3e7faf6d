use std::sync::Arc;

use axum::extract::State;
use marketplace_crm::{
    backend::{Backend, BackendClient, MemoryBackend},
    config::{AppConfig, CredentialTier},
    routes::health::{BackendHealth, health_check},
    services::order_source::MockOrderSource,
    state::AppState,
};

fn state_with(backend: Arc<dyn Backend>) -> AppState {
    AppState {
        backend,
        order_source: Arc::new(MockOrderSource::new()),
        marketplace_id: 2,
    }
}

#[tokio::test]
async fn health_reports_in_process_backend_as_connected() {
    let state = state_with(Arc::new(MemoryBackend::new()));

    let response = health_check(State(state)).await;
    assert_eq!(response.0.message, "Health check");

    let data = response.0.data.expect("health data");
    assert_eq!(data.status, "ok");
    assert_eq!(data.backend, BackendHealth::Connected);
    assert_eq!(data.marketplace_id, 2);
}

#[tokio::test]
async fn health_does_not_open_the_lazy_client() {
    // nothing listens on port 1; the check must not try to connect
    let config = AppConfig {
        database_url: "postgres://crm@127.0.0.1:1/crm".into(),
        service_database_url: None,
        host: "127.0.0.1".into(),
        port: 3000,
        sync_marketplace_id: 2,
    };
    let state = state_with(Arc::new(BackendClient::new(&config, CredentialTier::Service)));

    let data = health_check(State(state)).await.0.data.expect("health data");
    assert_eq!(data.status, "ok");
    assert_eq!(data.backend, BackendHealth::Idle);
}
