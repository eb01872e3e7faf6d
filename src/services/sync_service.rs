use crate::{
    backend::Backend,
    dto::{customers::CustomerUpsert, orders::OrderUpsert},
    error::AppResult,
    models::{Customer, Order, OrderDetails},
    services::order_source::{ExternalOrder, OrderSource},
};

pub const SYNC_SUCCESS_MESSAGE: &str = "Mock data synchronization successful!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running,
    Succeeded { processed: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncedOrder {
    pub customer: Customer,
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub marketplace_id: i64,
    pub orders: Vec<SyncedOrder>,
}

/// One invocation of the marketplace sync. Orders are reconciled in batch
/// order; the first failure stops the batch and earlier upserts stay applied.
pub struct MarketplaceSync<'a> {
    backend: &'a dyn Backend,
    source: &'a dyn OrderSource,
    marketplace_id: i64,
    state: SyncState,
}

impl<'a> MarketplaceSync<'a> {
    pub fn new(backend: &'a dyn Backend, source: &'a dyn OrderSource, marketplace_id: i64) -> Self {
        Self {
            backend,
            source,
            marketplace_id,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub async fn run(&mut self) -> AppResult<SyncReport> {
        self.state = SyncState::Running;
        tracing::info!(marketplace_id = self.marketplace_id, "marketplace sync started");

        match self.reconcile_batch().await {
            Ok(report) => {
                self.state = SyncState::Succeeded {
                    processed: report.orders.len(),
                };
                tracing::info!(
                    marketplace_id = self.marketplace_id,
                    processed = report.orders.len(),
                    "marketplace sync finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.state = SyncState::Failed {
                    error: err.to_string(),
                };
                tracing::error!(
                    marketplace_id = self.marketplace_id,
                    error = %err,
                    "marketplace sync failed"
                );
                Err(err)
            }
        }
    }

    async fn reconcile_batch(&self) -> AppResult<SyncReport> {
        let orders = self.source.fetch_orders(self.marketplace_id, None).await?;
        let mut synced = Vec::with_capacity(orders.len());
        for order in orders {
            synced.push(self.reconcile_order(order).await?);
        }
        Ok(SyncReport {
            marketplace_id: self.marketplace_id,
            orders: synced,
        })
    }

    async fn reconcile_order(&self, external: ExternalOrder) -> AppResult<SyncedOrder> {
        let customer = self
            .backend
            .upsert_customer(CustomerUpsert {
                marketplace_id: self.marketplace_id,
                platform_customer_id: external.customer.customer_id,
                full_name: external.customer.full_name,
                email: external.customer.email,
            })
            .await?;

        let order = self
            .backend
            .upsert_order(OrderUpsert {
                platform_order_id: external.order_id,
                customer_id: customer.id,
                marketplace_id: self.marketplace_id,
                status: external.status,
                order_date: external.order_date,
                order_details: OrderDetails {
                    products: external.products,
                },
            })
            .await?;

        tracing::info!(
            platform_order_id = %order.platform_order_id,
            customer = %customer.full_name,
            "order processed"
        );

        Ok(SyncedOrder { customer, order })
    }
}
