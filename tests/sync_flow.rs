use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use marketplace_crm::{
    backend::{
        Backend,
        memory::{MemoryBackend, Operation},
    },
    models::ProductLine,
    routes::create_functions_router,
    services::{
        order_source::{ExternalCustomer, ExternalOrder, MockOrderSource},
        sync_service::{MarketplaceSync, SYNC_SUCCESS_MESSAGE, SyncState},
    },
    state::AppState,
};
use tower::ServiceExt;

const HEPSIBURADA: i64 = 2;

fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.add_marketplace_with_id(HEPSIBURADA, "Hepsiburada");
    backend
}

fn order(order_id: &str, customer_id: &str, name: &str) -> ExternalOrder {
    ExternalOrder {
        order_id: order_id.into(),
        status: "Delivered".into(),
        order_date: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        customer: ExternalCustomer {
            customer_id: customer_id.into(),
            full_name: name.into(),
            email: format!("{customer_id}@example.com"),
        },
        products: vec![ProductLine {
            name: "Kettle".into(),
            quantity: 1,
            price: 450,
        }],
    }
}

#[tokio::test]
async fn mock_batch_is_upserted_and_linked() -> anyhow::Result<()> {
    let backend = backend();
    let source = MockOrderSource::new();

    let mut sync = MarketplaceSync::new(&backend, &source, HEPSIBURADA);
    assert_eq!(sync.state(), &SyncState::Idle);
    let report = sync.run().await?;
    assert_eq!(sync.state(), &SyncState::Succeeded { processed: 1 });

    let synced = &report.orders[0];
    assert_eq!(synced.customer.full_name, "Ali Veli");
    assert_eq!(synced.customer.platform_customer_id.as_deref(), Some("mock-customer-9876"));
    assert_eq!(synced.order.platform_order_id, "mock-order-12345");
    assert_eq!(synced.order.customer_id, synced.customer.id);
    assert_eq!(synced.order.marketplace_id, HEPSIBURADA);
    assert_eq!(synced.order.order_details.products.len(), 2);
    Ok(())
}

#[tokio::test]
async fn running_twice_converges_to_one_row_per_key() -> anyhow::Result<()> {
    let backend = backend();
    let source = MockOrderSource::with_orders(vec![
        order("o-1", "c-1", "Ali Veli"),
        order("o-2", "c-1", "Ali Veli"),
        order("o-3", "c-2", "Zeynep Kaya"),
    ]);

    MarketplaceSync::new(&backend, &source, HEPSIBURADA).run().await?;
    MarketplaceSync::new(&backend, &source, HEPSIBURADA).run().await?;

    let customers = backend.list_customers().await?;
    let orders = backend.list_orders().await?;
    assert_eq!(customers.len(), 2);
    assert_eq!(orders.len(), 3);

    let ali = customers
        .iter()
        .find(|c| c.platform_customer_id.as_deref() == Some("c-1"))
        .unwrap();
    let ali_orders = orders.iter().filter(|o| o.customer_id == ali.id).count();
    assert_eq!(ali_orders, 2);
    Ok(())
}

#[tokio::test]
async fn customer_failure_stops_the_batch() -> anyhow::Result<()> {
    let backend = backend();
    let source = MockOrderSource::with_orders(vec![
        order("o-1", "c-1", "Ali Veli"),
        order("o-2", "c-2", "Zeynep Kaya"),
        order("o-3", "c-3", "Mehmet Kaya"),
    ]);
    // second customer upsert fails
    backend.inject_fault(Operation::UpsertCustomer, 1, "permission denied for table customers");

    let mut sync = MarketplaceSync::new(&backend, &source, HEPSIBURADA);
    let err = sync.run().await.expect_err("sync must fail");

    assert_eq!(err.to_string(), "permission denied for table customers");
    assert_eq!(
        sync.state(),
        &SyncState::Failed {
            error: "permission denied for table customers".into()
        }
    );
    assert_eq!(
        backend.calls(),
        vec![
            Operation::UpsertCustomer,
            Operation::UpsertOrder,
            Operation::UpsertCustomer,
        ]
    );

    // the first order stays committed
    backend.clear_faults();
    let orders = backend.list_orders().await?;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].platform_order_id, "o-1");
    Ok(())
}

#[tokio::test]
async fn order_failure_aborts_after_customer_was_written() -> anyhow::Result<()> {
    let backend = backend();
    let source = MockOrderSource::new();
    backend.inject_fault(Operation::UpsertOrder, 0, "duplicate key value violates unique constraint");

    let result = MarketplaceSync::new(&backend, &source, HEPSIBURADA).run().await;
    assert!(result.is_err());

    // no rollback: the customer upsert already happened
    backend.clear_faults();
    assert_eq!(backend.list_customers().await?.len(), 1);
    assert!(backend.list_orders().await?.is_empty());
    Ok(())
}

fn app(backend: Arc<MemoryBackend>) -> Router {
    let state = AppState {
        backend,
        order_source: Arc::new(MockOrderSource::new()),
        marketplace_id: HEPSIBURADA,
    };
    Router::new()
        .nest("/functions", create_functions_router())
        .with_state(state)
}

async fn invoke(app: Router, method: Method) -> anyhow::Result<(StatusCode, serde_json::Value)> {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri("/functions/v1/sync-marketplace-data")
                .body(Body::empty())?,
        )
        .await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

#[tokio::test]
async fn http_invocation_reports_success() -> anyhow::Result<()> {
    let backend = Arc::new(backend());

    let (status, body) = invoke(app(backend.clone()), Method::POST).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "message": SYNC_SUCCESS_MESSAGE }));
    assert_eq!(backend.list_orders().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn http_invocation_reports_failure_text() -> anyhow::Result<()> {
    let backend = Arc::new(backend());
    backend.inject_fault(Operation::UpsertCustomer, 0, "JWT expired");

    let (status, body) = invoke(app(backend), Method::GET).await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, serde_json::json!({ "error": "JWT expired" }));
    Ok(())
}
