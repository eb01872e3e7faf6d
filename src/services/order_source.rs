//! Where marketplace orders come from before they are reconciled into the
//! CRM tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppResult, models::ProductLine};

/// Order as reported by a marketplace API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalOrder {
    pub order_id: String,
    pub status: String,
    pub order_date: DateTime<Utc>,
    pub customer: ExternalCustomer,
    pub products: Vec<ProductLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCustomer {
    pub customer_id: String,
    pub full_name: String,
    pub email: String,
}

#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Orders placed on `marketplace_id`, optionally only those after `since`.
    async fn fetch_orders(
        &self,
        marketplace_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<ExternalOrder>>;
}

/// Fixed batch standing in for the marketplace API.
#[derive(Debug, Clone)]
pub struct MockOrderSource {
    orders: Vec<ExternalOrder>,
}

impl MockOrderSource {
    pub fn new() -> Self {
        Self::with_orders(vec![ExternalOrder {
            order_id: "mock-order-12345".into(),
            status: "Shipped".into(),
            order_date: Utc::now(),
            customer: ExternalCustomer {
                customer_id: "mock-customer-9876".into(),
                full_name: "Ali Veli".into(),
                email: "ali.veli@example.com".into(),
            },
            products: vec![
                ProductLine {
                    name: "Smart Watch".into(),
                    quantity: 1,
                    price: 1500,
                },
                ProductLine {
                    name: "Headphones".into(),
                    quantity: 1,
                    price: 600,
                },
            ],
        }])
    }

    pub fn with_orders(orders: Vec<ExternalOrder>) -> Self {
        Self { orders }
    }
}

impl Default for MockOrderSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderSource for MockOrderSource {
    async fn fetch_orders(
        &self,
        _marketplace_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> AppResult<Vec<ExternalOrder>> {
        Ok(self
            .orders
            .iter()
            .filter(|order| since.is_none_or(|cursor| order.order_date > cursor))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn mock_batch_contains_the_sample_order() {
        let orders = MockOrderSource::new().fetch_orders(2, None).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "mock-order-12345");
        assert_eq!(orders[0].customer.customer_id, "mock-customer-9876");
        assert_eq!(orders[0].products.len(), 2);
    }

    #[tokio::test]
    async fn cursor_filters_older_orders() {
        let source = MockOrderSource::new();
        let cursor = Utc::now() + Duration::minutes(1);
        let orders = source.fetch_orders(2, Some(cursor)).await.unwrap();
        assert!(orders.is_empty());
    }

    #[test]
    fn external_order_uses_marketplace_field_names() {
        let raw = r#"{
            "orderId": "o-1",
            "status": "Delivered",
            "orderDate": "2024-05-01T10:00:00Z",
            "customer": { "customerId": "c-1", "fullName": "Zeynep Kaya", "email": "z@example.com" },
            "products": [{ "name": "Kettle", "quantity": 2, "price": 450 }]
        }"#;
        let order: ExternalOrder = serde_json::from_str(raw).unwrap();
        assert_eq!(order.customer.full_name, "Zeynep Kaya");
        assert_eq!(order.products[0].quantity, 2);
    }
}
