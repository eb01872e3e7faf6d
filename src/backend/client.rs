use async_trait::async_trait;
use sea_orm::Database;
use tokio::sync::OnceCell;

use super::{Backend, EventFilter, PgBackend, Subscription, Table};
use crate::{
    config::{AppConfig, CredentialTier},
    dto::{
        customers::{CustomerDraft, CustomerUpsert},
        inbox::NewMessage,
        orders::OrderUpsert,
    },
    error::{AppError, AppResult},
    models::{ConversationSummary, Customer, Marketplace, Message, Order},
};

/// Backend handle that connects on first use and reuses the connection
/// afterwards. Shared by passing it around (usually as `Arc<dyn Backend>`).
pub struct BackendClient {
    url: String,
    tier: CredentialTier,
    inner: OnceCell<PgBackend>,
}

impl BackendClient {
    pub fn new(config: &AppConfig, tier: CredentialTier) -> Self {
        Self {
            url: config.url_for(tier).to_string(),
            tier,
            inner: OnceCell::new(),
        }
    }

    pub fn tier(&self) -> CredentialTier {
        self.tier
    }

    /// Connected backend; the first caller opens the pool, concurrent
    /// callers wait for it.
    pub async fn connection(&self) -> AppResult<&PgBackend> {
        self.inner
            .get_or_try_init(|| async {
                tracing::info!(tier = ?self.tier, "connecting backend client");
                let orm = Database::connect(self.url.as_str()).await?;
                Ok::<_, AppError>(PgBackend::new(orm))
            })
            .await
    }
}

#[async_trait]
impl Backend for BackendClient {
    async fn list_customers(&self) -> AppResult<Vec<Customer>> {
        self.connection().await?.list_customers().await
    }

    async fn list_marketplaces(&self) -> AppResult<Vec<Marketplace>> {
        self.connection().await?.list_marketplaces().await
    }

    async fn insert_customer(&self, draft: CustomerDraft) -> AppResult<Customer> {
        self.connection().await?.insert_customer(draft).await
    }

    async fn update_customer(&self, id: i64, draft: CustomerDraft) -> AppResult<Customer> {
        self.connection().await?.update_customer(id, draft).await
    }

    async fn delete_customer(&self, id: i64) -> AppResult<()> {
        self.connection().await?.delete_customer(id).await
    }

    async fn upsert_customer(&self, customer: CustomerUpsert) -> AppResult<Customer> {
        self.connection().await?.upsert_customer(customer).await
    }

    async fn upsert_order(&self, order: OrderUpsert) -> AppResult<Order> {
        self.connection().await?.upsert_order(order).await
    }

    async fn list_orders(&self) -> AppResult<Vec<Order>> {
        self.connection().await?.list_orders().await
    }

    async fn list_conversations(&self) -> AppResult<Vec<ConversationSummary>> {
        self.connection().await?.list_conversations().await
    }

    async fn list_messages(&self, conversation_id: i64) -> AppResult<Vec<Message>> {
        self.connection().await?.list_messages(conversation_id).await
    }

    async fn insert_message(&self, message: NewMessage) -> AppResult<Message> {
        self.connection().await?.insert_message(message).await
    }

    async fn subscribe(&self, table: Table, filter: EventFilter) -> AppResult<Subscription> {
        self.connection().await?.subscribe(table, filter).await
    }

    fn is_connected(&self) -> bool {
        self.inner.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_does_not_connect_until_used() {
        let config = AppConfig {
            database_url: "postgres://anon@localhost/crm".into(),
            service_database_url: Some("postgres://service@localhost/crm".into()),
            host: "127.0.0.1".into(),
            port: 3000,
            sync_marketplace_id: 2,
        };
        let client = BackendClient::new(&config, CredentialTier::Service);
        assert!(!client.is_connected());
        assert_eq!(client.tier(), CredentialTier::Service);
        assert_eq!(client.url, "postgres://service@localhost/crm");
    }
}
